use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use beanworker_core::app::{ConstructionError, LoopState, RunnerBuilder};
use beanworker_core::contract::{Arguments, Callable, ContractError, FnCallable, Signature, TUBE_FIELD};
use beanworker_core::domain::{DEFAULT_PRIORITY, DEFAULT_TUBE, WorkerError};
use beanworker_core::impls::{BrokerOp, FaultPoint, JsonDecoder, MemoryBroker, MemoryJobState};
use beanworker_core::ports::BrokerError;
use rstest::rstest;
use serde_json::{Value, json};

/// Reserve without waiting: process whatever is queued, then stop.
const DRAIN: Option<Duration> = Some(Duration::ZERO);

type Calls = Arc<Mutex<Vec<Arguments>>>;

/// A callable that records every invocation and answers with `respond`.
fn recording<R>(signature: Signature, respond: R) -> (Arc<dyn Callable>, Calls)
where
    R: Fn(&Arguments) -> anyhow::Result<Value> + Send + Sync + 'static,
{
    let calls: Calls = Arc::default();
    let seen = Arc::clone(&calls);
    let respond = Arc::new(respond);
    let callable = FnCallable::new("test.greet", signature, move |args: Arguments| {
        let seen = Arc::clone(&seen);
        let respond = Arc::clone(&respond);
        async move {
            let result = respond(&args);
            seen.lock().unwrap().push(args);
            result
        }
    });
    (Arc::new(callable), calls)
}

fn greet() -> (Arc<dyn Callable>, Calls) {
    recording(Signature::new().required("name"), |_| Ok(json!(true)))
}

fn builder(broker: &MemoryBroker, callable: Arc<dyn Callable>) -> RunnerBuilder {
    RunnerBuilder::new().callable(callable).connector(Arc::new(broker.clone()))
}

fn fields(value: Value) -> Arguments {
    match value {
        Value::Object(map) => Arguments::Fields(map),
        other => panic!("not a mapping: {other}"),
    }
}

#[derive(Clone, Default)]
struct Logs(Arc<Mutex<Vec<u8>>>);

impl io::Write for Logs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Logs {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

/// Capture log output of the current thread.
fn capture_logs() -> (Logs, tracing::subscriber::DefaultGuard) {
    let logs = Logs::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .with_max_level(tracing::Level::DEBUG)
        .finish();
    (logs, tracing::subscriber::set_default(subscriber))
}

#[tokio::test]
async fn valid_job_is_deleted() {
    let broker = MemoryBroker::new();
    let id = broker.put(DEFAULT_TUBE, "name: Ada").await;
    let (callable, calls) = greet();
    let mut runner = builder(&broker, callable).build().unwrap();

    let reached = runner.run(DRAIN).await.unwrap();

    assert_eq!(reached.timeout, Duration::ZERO);
    assert_eq!(*calls.lock().unwrap(), vec![fields(json!({"name": "Ada"}))]);
    assert_eq!(broker.job_state(id).await, None);
    assert_eq!(broker.deletes_of(id).await, 1);
    assert_eq!(broker.buries_of(id).await, 0);
}

#[tokio::test]
async fn missing_field_is_buried_without_invocation() {
    let (logs, _guard) = capture_logs();
    let broker = MemoryBroker::new();
    let id = broker.put(DEFAULT_TUBE, r#"{"greeting": "hi"}"#).await;
    let (callable, calls) = greet();
    let mut runner = builder(&broker, callable).build().unwrap();

    runner.run(DRAIN).await.unwrap();

    assert!(calls.lock().unwrap().is_empty());
    assert_eq!(broker.job_state(id).await, Some(MemoryJobState::Buried));
    assert_eq!(broker.buries_of(id).await, 1);
    assert_eq!(broker.deletes_of(id).await, 0);
    assert!(logs.contents().contains("missing required fields (name)"));
}

#[rstest]
#[case::empty_mapping("{}", "decoded payload is empty")]
#[case::null_document("~", "decoded payload is empty")]
#[case::not_valid_data("not valid data", "not decodable")]
#[case::list("[1, 2]", "not decodable")]
#[case::broken_yaml("name: [unclosed", "not decodable")]
#[tokio::test]
async fn unusable_bodies_are_buried_without_invocation(#[case] body: &str, #[case] reason: &str) {
    let (logs, _guard) = capture_logs();
    let broker = MemoryBroker::new();
    let id = broker.put(DEFAULT_TUBE, body).await;
    let (callable, calls) = greet();
    let mut runner = builder(&broker, callable).build().unwrap();

    runner.run(DRAIN).await.unwrap();

    assert!(calls.lock().unwrap().is_empty());
    assert_eq!(broker.job_state(id).await, Some(MemoryJobState::Buried));
    assert_eq!(broker.deletes_of(id).await, 0);
    assert!(logs.contents().contains(reason), "{}", logs.contents());
}

#[tokio::test]
async fn empty_body_is_buried() {
    let (logs, _guard) = capture_logs();
    let broker = MemoryBroker::new();
    let id = broker.put(DEFAULT_TUBE, "").await;
    let (callable, calls) = greet();
    let mut runner = builder(&broker, callable).build().unwrap();

    runner.run(DRAIN).await.unwrap();

    assert!(calls.lock().unwrap().is_empty());
    assert_eq!(broker.job_state(id).await, Some(MemoryJobState::Buried));
    assert!(logs.contents().contains("job's body is empty"));
}

#[tokio::test]
async fn failing_callable_buries_with_detail() {
    let (logs, _guard) = capture_logs();
    let broker = MemoryBroker::new();
    let id = broker.put(DEFAULT_TUBE, "name: X").await;
    let (callable, calls) = recording(Signature::new().required("name"), |_| {
        Err(anyhow::anyhow!("name X is not allowed").context("ValueError"))
    });
    let mut runner = builder(&broker, callable).build().unwrap();

    runner.run(DRAIN).await.unwrap();

    assert_eq!(calls.lock().unwrap().len(), 1);
    assert_eq!(broker.job_state(id).await, Some(MemoryJobState::Buried));
    assert_eq!(broker.deletes_of(id).await, 0);
    let logs = logs.contents();
    assert!(logs.contains("ERROR"));
    assert!(logs.contains("ValueError"));
    assert!(logs.contains("name X is not allowed"));
}

#[tokio::test]
async fn tube_name_is_injected_when_declared() {
    let broker = MemoryBroker::new();
    let id = broker.put("jobs-high", r#"{"name": "Ada"}"#).await;
    let (callable, calls) = recording(Signature::new().required("name").optional(TUBE_FIELD), |_| {
        Ok(json!(true))
    });
    let mut runner = builder(&broker, callable).tubes(["jobs-high"]).build().unwrap();

    runner.run(DRAIN).await.unwrap();

    assert_eq!(
        *calls.lock().unwrap(),
        vec![fields(json!({"name": "Ada", "__tube__": "jobs-high"}))]
    );
    assert_eq!(calls.lock().unwrap()[0].tube(), Some("jobs-high"));
    assert_eq!(
        broker.history().await[..4],
        [
            BrokerOp::Watch("jobs-high".to_string()),
            BrokerOp::Ignore(DEFAULT_TUBE.to_string()),
            BrokerOp::Reserve(id),
            BrokerOp::Delete(id),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn run_stops_after_timeout_without_jobs() {
    let broker = MemoryBroker::new();
    let (callable, calls) = greet();
    let mut runner = builder(&broker, callable).build().unwrap();
    let start = tokio::time::Instant::now();

    let reached = runner.run(Some(Duration::from_secs(5))).await.unwrap();

    assert_eq!(reached.timeout, Duration::from_secs(5));
    assert!(start.elapsed() >= Duration::from_secs(5));
    assert!(calls.lock().unwrap().is_empty());
    assert!(!broker.history().await.iter().any(|op| matches!(op, BrokerOp::Reserve(_))));
    assert_eq!(runner.state(), LoopState::Terminated);
}

#[tokio::test]
async fn undeclared_fields_are_dropped() {
    let broker = MemoryBroker::new();
    broker.put(DEFAULT_TUBE, "name: Ada\nage: 36\n").await;
    let (callable, calls) = recording(Signature::new().required("name").optional("greeting"), |_| Ok(json!(1)));
    let mut runner = builder(&broker, callable).build().unwrap();

    runner.run(DRAIN).await.unwrap();

    assert_eq!(*calls.lock().unwrap(), vec![fields(json!({"name": "Ada"}))]);
}

#[tokio::test]
async fn arbitrary_fields_are_passed_through() {
    let broker = MemoryBroker::new();
    broker.put(DEFAULT_TUBE, "anything: 1\nelse: two\n").await;
    let (callable, calls) = recording(Signature::new().arbitrary_fields(), |_| Ok(json!("done")));
    let mut runner = builder(&broker, callable).build().unwrap();

    runner.run(DRAIN).await.unwrap();

    assert_eq!(*calls.lock().unwrap(), vec![fields(json!({"anything": 1, "else": "two"}))]);
}

#[tokio::test]
async fn raw_mode_hands_over_the_body() {
    let broker = MemoryBroker::new();
    let id = broker.put("raw", "not yaml: [").await;
    let (callable, calls) = recording(Signature::new().required("body").optional(TUBE_FIELD), |_| Ok(json!(true)));
    let mut runner = builder(&broker, callable).tube("raw").parse(false).build().unwrap();

    runner.run(DRAIN).await.unwrap();

    assert_eq!(
        *calls.lock().unwrap(),
        vec![Arguments::Body {
            body: b"not yaml: [".to_vec(),
            tube: Some("raw".to_string()),
        }]
    );
    assert_eq!(broker.job_state(id).await, None);
}

#[tokio::test]
async fn raw_mode_omits_tube_unless_declared() {
    let broker = MemoryBroker::new();
    broker.put(DEFAULT_TUBE, "payload").await;
    let (callable, calls) = recording(Signature::new().required("body"), |_| Ok(json!(true)));
    let mut runner = builder(&broker, callable).parse(false).build().unwrap();

    runner.run(DRAIN).await.unwrap();

    assert_eq!(calls.lock().unwrap()[0].tube(), None);
}

#[tokio::test]
async fn json_decoder_rejects_yaml_bodies() {
    let broker = MemoryBroker::new();
    let yaml = broker.put(DEFAULT_TUBE, "name: Ada").await;
    let json = broker.put(DEFAULT_TUBE, r#"{"name": "Ada"}"#).await;
    let (callable, calls) = greet();
    let mut runner = builder(&broker, callable).decoder(Arc::new(JsonDecoder)).build().unwrap();

    runner.run(DRAIN).await.unwrap();

    assert_eq!(calls.lock().unwrap().len(), 1);
    assert_eq!(broker.job_state(yaml).await, Some(MemoryJobState::Buried));
    assert_eq!(broker.job_state(json).await, None);
}

#[tokio::test]
async fn falsy_result_buries_at_job_priority() {
    let broker = MemoryBroker::new();
    let id = broker.put_with(DEFAULT_TUBE, "name: Ada", 77, 60).await;
    let (callable, _calls) = recording(Signature::new().required("name"), |_| Ok(json!(false)));
    let mut runner = builder(&broker, callable).build().unwrap();

    runner.run(DRAIN).await.unwrap();

    assert!(broker.history().await.contains(&BrokerOp::Bury(id, 77)));
    assert_eq!(broker.deletes_of(id).await, 0);
}

#[tokio::test]
async fn panic_is_contained_and_loop_continues() {
    let (logs, _guard) = capture_logs();
    let broker = MemoryBroker::new();
    let boom = broker.put(DEFAULT_TUBE, "name: boom").await;
    let fine = broker.put(DEFAULT_TUBE, "name: fine").await;
    let (callable, calls) = recording(Signature::new().required("name"), |args| {
        if args.get_str("name") == Some("boom") {
            panic!("exploded");
        }
        Ok(json!(true))
    });
    let mut runner = builder(&broker, callable).build().unwrap();

    runner.run(DRAIN).await.unwrap();

    assert_eq!(broker.job_state(boom).await, Some(MemoryJobState::Buried));
    assert_eq!(broker.job_state(fine).await, None);
    assert_eq!(calls.lock().unwrap().len(), 1);
    let logs = logs.contents();
    assert!(logs.contains("exploded"), "{logs}");
    assert!(logs.contains("consume_loop.rs:"), "{logs}");
}

#[tokio::test]
async fn delete_that_does_not_take_effect_buries() {
    let (logs, _guard) = capture_logs();
    let broker = MemoryBroker::new();
    broker.ignore_deletes(true).await;
    let id = broker.put(DEFAULT_TUBE, "name: Ada").await;
    let (callable, _calls) = greet();
    let mut runner = builder(&broker, callable).build().unwrap();

    runner.run(DRAIN).await.unwrap();

    assert_eq!(broker.job_state(id).await, Some(MemoryJobState::Buried));
    assert_eq!(broker.buries_of(id).await, 1);
    assert!(logs.contents().contains("could not be deleted"));
}

fn internal_error(command: &str) -> BrokerError {
    BrokerError::CommandFailed {
        command: command.to_string(),
        response: "INTERNAL_ERROR".to_string(),
    }
}

#[tokio::test]
async fn failed_stats_query_buries_at_default_priority() {
    let (logs, _guard) = capture_logs();
    let broker = MemoryBroker::new();
    let id = broker.put_with(DEFAULT_TUBE, "name: Ada", 5, 60).await;
    broker.fail_next(FaultPoint::StatsJob, internal_error("stats-job 1")).await;
    let (callable, calls) = greet();
    let mut runner = builder(&broker, callable).build().unwrap();

    runner.run(DRAIN).await.unwrap();

    assert!(calls.lock().unwrap().is_empty());
    assert_eq!(broker.job_state(id).await, Some(MemoryJobState::Buried));
    assert_eq!(broker.deletes_of(id).await, 0);
    assert_eq!(broker.buries_of(id).await, 1);
    assert!(broker.history().await.contains(&BrokerOp::Bury(id, DEFAULT_PRIORITY)));
    assert!(logs.contents().contains("INTERNAL_ERROR"), "{}", logs.contents());
}

#[tokio::test]
async fn vanished_job_is_skipped_and_loop_continues() {
    let (logs, _guard) = capture_logs();
    let broker = MemoryBroker::new();
    let gone = broker.put(DEFAULT_TUBE, "name: gone").await;
    let next = broker.put(DEFAULT_TUBE, "name: next").await;
    broker.fail_next(FaultPoint::StatsJob, BrokerError::NotFound).await;
    let (callable, calls) = greet();
    let mut runner = builder(&broker, callable).build().unwrap();

    runner.run(DRAIN).await.unwrap();

    assert_eq!(broker.deletes_of(gone).await, 0);
    assert_eq!(broker.buries_of(gone).await, 0);
    assert_eq!(broker.deletes_of(next).await, 1);
    assert_eq!(broker.job_state(next).await, None);
    assert_eq!(*calls.lock().unwrap(), vec![fields(json!({"name": "next"}))]);
    assert!(logs.contents().contains("vanished"));
}

#[tokio::test]
async fn failed_delete_buries_and_loop_continues() {
    let (logs, _guard) = capture_logs();
    let broker = MemoryBroker::new();
    let first = broker.put(DEFAULT_TUBE, "name: first").await;
    let second = broker.put(DEFAULT_TUBE, "name: second").await;
    broker.fail_next(FaultPoint::Delete, internal_error("delete 1")).await;
    let (callable, calls) = greet();
    let mut runner = builder(&broker, callable).build().unwrap();

    runner.run(DRAIN).await.unwrap();

    assert_eq!(calls.lock().unwrap().len(), 2);
    assert_eq!(broker.job_state(first).await, Some(MemoryJobState::Buried));
    assert_eq!(broker.deletes_of(first).await, 0);
    assert_eq!(broker.buries_of(first).await, 1);
    assert_eq!(broker.job_state(second).await, None);
    assert_eq!(broker.deletes_of(second).await, 1);
    assert!(logs.contents().contains("could not be deleted"));
}

#[tokio::test]
async fn refused_bury_is_logged_and_loop_continues() {
    let (logs, _guard) = capture_logs();
    let broker = MemoryBroker::new();
    let refused = broker.put(DEFAULT_TUBE, "name: refused").await;
    let fine = broker.put(DEFAULT_TUBE, "name: fine").await;
    broker.fail_next(FaultPoint::Bury, BrokerError::NotFound).await;
    let (callable, calls) = recording(Signature::new().required("name"), |args| {
        Ok(json!(args.get_str("name") != Some("refused")))
    });
    let mut runner = builder(&broker, callable).build().unwrap();

    runner.run(DRAIN).await.unwrap();

    assert_eq!(calls.lock().unwrap().len(), 2);
    assert_eq!(broker.buries_of(refused).await, 0);
    assert_eq!(broker.deletes_of(refused).await, 0);
    assert_eq!(broker.job_state(fine).await, None);
    assert_eq!(broker.deletes_of(fine).await, 1);
    assert!(logs.contents().contains("could not bury job"));
}

#[tokio::test]
async fn every_job_is_deleted_or_buried_never_both() {
    let broker = MemoryBroker::new();
    let mut ids = Vec::new();
    for body in ["name: ok", "", "name: fail", "{}", "other: 1", "name: ok", "junk: [", "name: panic"] {
        ids.push(broker.put(DEFAULT_TUBE, body).await);
    }
    let (callable, _calls) = recording(Signature::new().required("name"), |args| match args.get_str("name") {
        Some("ok") => Ok(json!(true)),
        Some("panic") => panic!("bad"),
        _ => Err(anyhow::anyhow!("refused")),
    });
    let mut runner = builder(&broker, callable).build().unwrap();

    runner.run(DRAIN).await.unwrap();

    for id in ids {
        let deletes = broker.deletes_of(id).await;
        let buries = broker.buries_of(id).await;
        assert_eq!(deletes + buries, 1, "{id}: {deletes} deletes, {buries} buries");
    }
}

#[tokio::test]
async fn lost_connection_ends_run_and_next_run_reconnects() {
    let broker = MemoryBroker::new();
    let id = broker.put(DEFAULT_TUBE, "name: Ada").await;
    let severed = Arc::new(AtomicBool::new(false));
    let callable = {
        let broker = broker.clone();
        let severed = Arc::clone(&severed);
        FnCallable::new("test.sever", Signature::new().required("name"), move |_args: Arguments| {
            let broker = broker.clone();
            let severed = Arc::clone(&severed);
            async move {
                if !severed.swap(true, Ordering::SeqCst) {
                    broker.sever_connections().await;
                }
                anyhow::Ok(json!(true))
            }
        })
    };
    let mut runner = builder(&broker, Arc::new(callable)).build().unwrap();

    let err = runner.run(DRAIN).await.unwrap_err();
    assert!(matches!(err, WorkerError::Connection(_)));
    assert!(!runner.is_connected());
    assert_eq!(broker.job_state(id).await, Some(MemoryJobState::Ready));

    runner.run(DRAIN).await.unwrap();
    assert_eq!(broker.job_state(id).await, None);
    assert!(runner.is_connected());
}

#[tokio::test]
async fn connection_is_reused_between_runs_and_released_on_close() {
    let broker = MemoryBroker::new();
    let (callable, _calls) = greet();
    let mut runner = builder(&broker, callable).build().unwrap();

    runner.run(DRAIN).await.unwrap();
    broker.put(DEFAULT_TUBE, "name: Ada").await;
    runner.run(DRAIN).await.unwrap();
    runner.close().await;
    runner.close().await;

    let history = broker.history().await;
    let watches = history.iter().filter(|op| matches!(op, BrokerOp::Watch(_))).count();
    let closes = history.iter().filter(|op| matches!(op, BrokerOp::Close)).count();
    assert_eq!(watches, 1);
    assert_eq!(closes, 1);
    assert!(!runner.is_connected());
}

#[tokio::test]
async fn only_configured_tubes_are_consumed() {
    let broker = MemoryBroker::new();
    let other = broker.put("elsewhere", "name: Ada").await;
    let mine = broker.put("mine", "name: Ada").await;
    let (callable, _calls) = greet();
    let mut runner = builder(&broker, callable).tubes(["mine"]).build().unwrap();

    runner.run(DRAIN).await.unwrap();

    assert_eq!(broker.job_state(mine).await, None);
    assert_eq!(broker.job_state(other).await, Some(MemoryJobState::Ready));
}

#[rstest]
#[case::nothing(Signature::new())]
#[case::optional_only(Signature::new().optional("a"))]
#[case::tube_only(Signature::new().required(TUBE_FIELD))]
fn construction_needs_a_required_field(#[case] signature: Signature) {
    let (callable, _calls) = recording(signature, |_| Ok(json!(true)));
    let err = RunnerBuilder::new().callable(callable).build().err().unwrap();
    assert!(matches!(err, ConstructionError::Contract(ContractError::NoArguments(_))));
}

#[rstest]
#[case::one(Signature::new().required("a"))]
#[case::two(Signature::new().required("a").required("b"))]
#[case::sink(Signature::new().arbitrary_fields())]
fn construction_succeeds_with_required_fields(#[case] signature: Signature) {
    let (callable, _calls) = recording(signature, |_| Ok(json!(true)));
    assert!(RunnerBuilder::new().callable(callable).build().is_ok());
}
