use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossbeam_channel::bounded;
use serde_json::{json, Value};

use zetta_device::{
    ActionError, Descriptor, Device, DeviceContext, DeviceError, DeviceLog, DeviceStream, Field,
    MemoryLog, MemoryPubSub, MemoryRegistry, Message, PubSub, StreamOptions,
};

fn context() -> (DeviceContext, Arc<MemoryPubSub>, Arc<MemoryLog>) {
    let pubsub = Arc::new(MemoryPubSub::default());
    let log = Arc::new(MemoryLog::new());
    let context = DeviceContext::new(
        Arc::clone(&pubsub) as Arc<dyn PubSub>,
        Arc::new(MemoryRegistry::new()),
        Arc::clone(&log) as Arc<dyn DeviceLog>,
    );
    (context, pubsub, log)
}

fn call_sync(device: &Device, transition: &str, args: Vec<Value>) -> Result<Vec<Value>, DeviceError> {
    let (tx, rx) = bounded(1);
    device.call(
        transition,
        args,
        Some(Box::new(move |result| {
            let _ = tx.send(result);
        })),
    );
    rx.recv_timeout(Duration::from_secs(1)).expect("completion")
}

fn photocell() -> Descriptor {
    Descriptor::builder("photocell")
        .name("hallway photocell")
        .state("off")
        .when("off", ["turn-on"])
        .when("on", ["turn-off", "recalibrate"])
        .map("turn-on", |device, _, complete| {
            device.set_state("on");
            complete.done();
        })
        .map("turn-off", |device, _, complete| {
            device.set_state("off");
            complete.done();
        })
        .map_fields(
            "recalibrate",
            |device, args, complete| {
                let offset = args.first().cloned().unwrap_or(Value::Null);
                device.set_property("offset", offset);
                complete.done();
            },
            vec![Field::typed("offset", "number")],
        )
        .monitor("intensity")
        .build()
}

#[test]
fn lamp_lifecycle_publishes_state_and_log_records() {
    let (context, pubsub, _) = context();
    let device = Device::generate(photocell(), context);

    let state_topic = format!("photocell/{}/state", device.id());
    let logs_topic = format!("photocell/{}/logs", device.id());
    let states = pubsub.subscribe(&state_topic);
    let logs = pubsub.subscribe(&logs_topic);

    call_sync(&device, "turn-on", vec![]).unwrap();
    assert_eq!(device.state(), Some("on".to_string()));

    let Message::Object(envelope) = states.recv_timeout(Duration::from_secs(1)).unwrap() else {
        panic!("expected object framing on the state stream");
    };
    assert_eq!(envelope["topic"], json!(state_topic));
    assert_eq!(envelope["data"], json!("on"));

    let Message::Object(record) = logs.recv_timeout(Duration::from_secs(1)).unwrap() else {
        panic!("expected a structured log record");
    };
    assert_eq!(record["topic"], json!(logs_topic));
    assert_eq!(record["transition"], json!("turn-on"));
    assert!(record["timestamp"].as_i64().unwrap() > 0);
    assert_eq!(record["properties"]["id"], json!(device.id().to_string()));
    assert_eq!(record["properties"]["state"], json!("on"));
    assert!(record["transitions"]["turn-off"].is_object());
    assert!(record["transitions"]["recalibrate"].is_object());
    assert!(record["transitions"].get("turn-on").is_none());

    call_sync(&device, "turn-off", vec![]).unwrap();
    assert_eq!(device.state(), Some("off".to_string()));
}

#[test]
fn transition_arguments_reach_handler_and_log_record() {
    let (context, pubsub, _) = context();
    let device = Device::generate(photocell(), context);
    let logs = pubsub.subscribe(&format!("photocell/{}/logs", device.id()));

    call_sync(&device, "turn-on", vec![]).unwrap();
    let _ = logs.recv_timeout(Duration::from_secs(1)).unwrap();

    call_sync(&device, "recalibrate", vec![json!(0.5)]).unwrap();
    assert_eq!(device.property("offset"), Some(json!(0.5)));

    let Message::Object(record) = logs.recv_timeout(Duration::from_secs(1)).unwrap() else {
        panic!("expected a structured log record");
    };
    assert_eq!(
        record["input"],
        json!([{ "name": "offset", "value": 0.5 }])
    );
}

#[test]
fn transition_log_is_forwarded_to_the_log_sink() {
    let (context, _, log) = context();
    let device = Device::generate(photocell(), context);

    call_sync(&device, "turn-on", vec![]).unwrap();

    let entries = log.entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].subject, "device");
    assert_eq!(entries[0].message, "photocell transition turn-on");
    let record = entries[0].data.as_ref().expect("record attached");
    assert_eq!(record["transition"], json!("turn-on"));
}

#[test]
fn declared_stream_setup_receives_a_live_write_side() {
    let captured: Arc<Mutex<Option<DeviceStream>>> = Arc::new(Mutex::new(None));
    let capture = Arc::clone(&captured);
    let descriptor = Descriptor::builder("photocell")
        .stream("samples", move |_, stream| {
            *capture.lock().unwrap() = Some(stream);
        })
        .build();

    let (context, _, _) = context();
    let device = Device::generate(descriptor, context);
    let consumer = device.create_read_stream("samples").unwrap();

    let stream = captured.lock().unwrap().take().expect("setup ran at generation");
    stream.write(json!({ "lux": 17 })).unwrap();

    let Message::Object(envelope) = consumer.recv_timeout(Duration::from_secs(1)).unwrap() else {
        panic!("expected object framing");
    };
    assert_eq!(envelope["data"], json!({ "lux": 17 }));
}

#[test]
fn binary_stream_round_trips_raw_bytes() {
    let captured: Arc<Mutex<Option<DeviceStream>>> = Arc::new(Mutex::new(None));
    let capture = Arc::clone(&captured);
    let descriptor = Descriptor::builder("camera")
        .stream_with(
            "frames",
            move |_, stream| {
                *capture.lock().unwrap() = Some(stream);
            },
            StreamOptions {
                binary: true,
                disable: false,
            },
        )
        .build();

    let (context, _, _) = context();
    let device = Device::generate(descriptor, context);
    let consumer = device.create_read_stream("frames").unwrap();

    let stream = captured.lock().unwrap().take().expect("setup ran at generation");
    stream.write_bytes(vec![0xca, 0xfe]).unwrap();

    assert_eq!(
        consumer.recv_timeout(Duration::from_secs(1)).unwrap(),
        Message::Binary(vec![0xca, 0xfe])
    );
}

#[test]
fn streams_created_disabled_stay_silent_until_enabled() {
    let captured: Arc<Mutex<Option<DeviceStream>>> = Arc::new(Mutex::new(None));
    let capture = Arc::clone(&captured);
    let descriptor = Descriptor::builder("photocell")
        .stream_with(
            "samples",
            move |_, stream| {
                *capture.lock().unwrap() = Some(stream);
            },
            StreamOptions {
                binary: false,
                disable: true,
            },
        )
        .build();

    let (context, _, _) = context();
    let device = Device::generate(descriptor, context);
    let consumer = device.create_read_stream("samples").unwrap();
    let stream = captured.lock().unwrap().take().expect("setup ran at generation");

    stream.write(json!(1)).unwrap();
    assert_eq!(consumer.try_recv().unwrap(), None);

    device.enable_stream("samples").unwrap();
    stream.write(json!(2)).unwrap();
    let Message::Object(envelope) = consumer.recv_timeout(Duration::from_secs(1)).unwrap() else {
        panic!("expected object framing");
    };
    assert_eq!(envelope["data"], json!(2));
}

#[test]
fn handler_action_error_reaches_the_caller() {
    let descriptor = Descriptor::builder("lock")
        .state("locked")
        .when("locked", ["unlock"])
        .map_fields(
            "unlock",
            |_, args, complete| {
                if args.first().and_then(Value::as_str) == Some("hunter2") {
                    complete.done();
                } else {
                    let mut details = serde_json::Map::new();
                    details.insert("reason".to_string(), json!("bad code"));
                    complete.fail(ActionError::new(401).with_properties(details).into());
                }
            },
            vec![Field::typed("code", "string")],
        )
        .build();

    let (context, _, _) = context();
    let device = Device::generate(descriptor, context);

    let err = call_sync(&device, "unlock", vec![json!("wrong")]).unwrap_err();
    match err {
        DeviceError::Action(action) => {
            assert_eq!(action.status, 401);
            assert_eq!(action.properties["reason"], json!("bad code"));
        }
        other => panic!("expected action error, got {other:?}"),
    }
    assert_eq!(err_state(&device), "locked");

    call_sync(&device, "unlock", vec![json!("hunter2")]).unwrap();
}

fn err_state(device: &Device) -> String {
    device.state().expect("state set")
}
