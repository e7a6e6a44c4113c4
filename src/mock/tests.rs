use tracing_test::traced_test;

use super::arena::Arena;
use crate::exit::Cause;
use crate::layer::{Environment, Tag};
use crate::mock::{Assertion, Expectation, Method, Mock, MockError, Proxy, Rejection, Returns};
use crate::Effect;

#[derive(Clone)]
struct Store {
    proxy: Proxy,
}

impl Store {
    fn get(&self, key: u32) -> Effect<String, String, Environment> {
        self.proxy.invoke(&StoreMock::GET, key)
    }
}

struct StoreMock;

impl StoreMock {
    const GET: Method<StoreMock, u32, String, String> = Method::new("get");
    const PUT: Method<StoreMock, (u32, String), (), String> = Method::new("put");
    const GET_NUMBER: Method<StoreMock, u32, u64, String> = Method::new("get");
    const GET_BY_NAME: Method<StoreMock, String, String, String> = Method::new("get");
}

impl Mock for StoreMock {
    type Service = Store;
    const NAME: &'static str = "Store";

    fn build(proxy: Proxy) -> Store {
        Store { proxy }
    }
}

#[derive(Clone)]
struct Clock {
    proxy: Proxy,
}

impl Clock {
    fn now(&self) -> Effect<u64, String, Environment> {
        self.proxy.invoke(&ClockMock::NOW, ())
    }
}

struct ClockMock;

impl ClockMock {
    const NOW: Method<ClockMock, (), u64, String> = Method::new("now");
}

impl Mock for ClockMock {
    type Service = Clock;
    const NAME: &'static str = "Clock";

    fn build(proxy: Proxy) -> Clock {
        Clock { proxy }
    }
}

fn get(key: u32, value: &str) -> Expectation {
    StoreMock::GET.expect(Assertion::equal_to(key), Returns::value(value.to_owned()))
}

fn put(key: u32) -> Expectation {
    StoreMock::PUT.expect(
        Assertion::satisfies(format!("key {key}"), move |(k, _): &(u32, String)| *k == key),
        Returns::unit(),
    )
}

fn proxy(expectation: &Expectation) -> Proxy {
    Proxy::new(Arena::compile(&expectation.node))
}

fn value(text: &str) -> Result<Result<String, String>, MockError> {
    Ok(Ok(text.to_owned()))
}

fn mock_defect<T>(result: &Result<T, Cause<String>>) -> Option<MockError> {
    let cause = result.as_ref().err()?;
    cause
        .defects()
        .into_iter()
        .find_map(|defect| defect.downcast_ref::<MockError>().cloned())
}

#[test]
fn test_chain_rejects_out_of_order_calls() {
    let store = proxy(&get(1, "a").and_then(get(2, "b")));

    let error = store.try_invoke(&StoreMock::GET, 2).unwrap_err();
    assert_eq!(
        error,
        MockError::UnexpectedCall {
            method: "Store::get".to_string(),
            input: "2".to_string(),
            rejected: vec![Rejection::InvalidArguments {
                method: "Store::get".to_string(),
                assertion: "equal to 1".to_string(),
            }],
        }
    );

    assert_eq!(store.try_invoke(&StoreMock::GET, 1), value("a"));
    assert_eq!(store.try_invoke(&StoreMock::GET, 2), value("b"));
    assert_eq!(store.verify(), Ok(()));
}

#[test]
fn test_and_accepts_any_order() {
    let store = proxy(&get(1, "a").and(get(2, "b")));

    assert_eq!(store.try_invoke(&StoreMock::GET, 2), value("b"));
    assert!(store.verify().is_err());
    assert_eq!(store.try_invoke(&StoreMock::GET, 1), value("a"));
    assert_eq!(store.verify(), Ok(()));
}

#[test]
fn test_repeated_stops_at_its_upper_bound() {
    let store = proxy(&get(1, "a").between(1, 3));

    assert!(store.verify().is_err());
    for _ in 0..3 {
        assert_eq!(store.try_invoke(&StoreMock::GET, 1), value("a"));
        assert_eq!(store.verify(), Ok(()));
    }

    let error = store.try_invoke(&StoreMock::GET, 1).unwrap_err();
    assert!(matches!(error, MockError::UnexpectedCall { rejected, .. } if rejected.is_empty()));
}

#[test]
fn test_partial_repetition_is_not_satisfied() {
    let store = proxy(&get(1, "a").and_then(get(2, "b")).times(2));

    assert_eq!(store.try_invoke(&StoreMock::GET, 1), value("a"));
    assert_eq!(store.try_invoke(&StoreMock::GET, 2), value("b"));
    assert_eq!(store.try_invoke(&StoreMock::GET, 1), value("a"));

    match store.verify() {
        Err(MockError::Unsatisfied { unmet }) => {
            assert_eq!(unmet.len(), 1);
            assert!(
                unmet[0].ends_with("completed 1 times with one repetition unfinished"),
                "{unmet:?}"
            );
        }
        other => panic!("expected an unsatisfied script, got {other:?}"),
    }

    assert_eq!(store.try_invoke(&StoreMock::GET, 2), value("b"));
    assert_eq!(store.verify(), Ok(()));
}

#[test]
fn test_earlier_alternatives_shadow_later_ones() {
    let store = proxy(&get(1, "first").or(get(1, "second")));
    assert_eq!(store.try_invoke(&StoreMock::GET, 1), value("first"));
    assert_eq!(store.verify(), Ok(()));
    assert_eq!(store.try_invoke(&StoreMock::GET, 1), value("second"));
    assert!(store.try_invoke(&StoreMock::GET, 1).is_err());

    let any_then_one = StoreMock::GET
        .returns(Returns::value("any".to_owned()))
        .and(get(1, "one"));
    let store = proxy(&any_then_one);
    assert_eq!(store.try_invoke(&StoreMock::GET, 1), value("any"));
    assert_eq!(
        store.verify(),
        Err(MockError::Unsatisfied {
            unmet: vec!["Store::get(equal to 1)".to_string()],
        })
    );
}

#[test]
fn test_chain_moves_past_a_satisfied_head() {
    let store = proxy(&get(1, "a").at_least(1).and_then(get(2, "b")));

    assert_eq!(store.try_invoke(&StoreMock::GET, 1), value("a"));
    assert_eq!(store.try_invoke(&StoreMock::GET, 1), value("a"));
    assert_eq!(store.try_invoke(&StoreMock::GET, 2), value("b"));
    assert_eq!(store.verify(), Ok(()));

    // The head is closed once the chain has moved on.
    assert!(store.try_invoke(&StoreMock::GET, 1).is_err());
}

#[test]
fn test_empty_expectation_accepts_nothing() {
    let store = proxy(&Expectation::empty::<StoreMock>());

    assert_eq!(store.verify(), Ok(()));
    assert!(matches!(
        store.try_invoke(&StoreMock::GET, 1),
        Err(MockError::UnexpectedCall { .. })
    ));
}

#[test]
fn test_mismatch_lists_each_rejection() {
    let store = proxy(&get(1, "a").or(put(3)));

    let error = store.try_invoke(&StoreMock::GET, 5).unwrap_err();
    match &error {
        MockError::UnexpectedCall { rejected, .. } => assert_eq!(
            rejected,
            &vec![
                Rejection::InvalidArguments {
                    method: "Store::get".to_string(),
                    assertion: "equal to 1".to_string(),
                },
                Rejection::InvalidMethod {
                    expected: "Store::put".to_string(),
                    actual: "Store::get".to_string(),
                },
            ]
        ),
        other => panic!("unexpected error {other:?}"),
    }
    assert!(error.to_string().starts_with("unexpected call Store::get(5)\n  - "));

    assert_eq!(store.try_invoke(&StoreMock::PUT, (3, "x".to_string())), Ok(Ok(())));
}

#[test]
fn test_conflicting_answer_type_is_reported_and_not_counted() {
    let store = proxy(&get(1, "a"));

    assert_eq!(
        store.try_invoke(&StoreMock::GET_NUMBER, 1),
        Err(MockError::TypeMismatch {
            method: "Store::get".to_string(),
        })
    );
    assert!(matches!(store.verify(), Err(MockError::Unsatisfied { .. })));

    assert_eq!(store.try_invoke(&StoreMock::GET, 1), value("a"));
    assert_eq!(store.verify(), Ok(()));
}

#[test]
fn test_conflicting_input_type_is_reported_and_not_counted() {
    let store = proxy(&get(1, "a"));

    assert_eq!(
        store.try_invoke(&StoreMock::GET_BY_NAME, "1".to_string()),
        Err(MockError::TypeMismatch {
            method: "Store::get".to_string(),
        })
    );
    assert!(store.verify().is_err());

    assert_eq!(store.try_invoke(&StoreMock::GET, 1), value("a"));
    assert_eq!(store.verify(), Ok(()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_calls_each_consume_their_own_leaf() {
    let keys: Vec<u32> = (0..64).collect();
    let script = keys
        .iter()
        .map(|&key| get(key, &format!("v{key}")))
        .reduce(Expectation::and)
        .unwrap();
    let store = proxy(&script);

    let calls: Vec<_> = keys
        .iter()
        .map(|&key| {
            let store = store.clone();
            tokio::spawn(async move { (key, store.try_invoke(&StoreMock::GET, key)) })
        })
        .collect();

    for call in calls {
        let (key, answer) = call.await.unwrap();
        assert_eq!(answer, value(&format!("v{key}")));
    }
    assert_eq!(store.verify(), Ok(()));
}

#[test]
fn test_describes_the_script() {
    let script = get(1, "a").and_then(get(2, "b").or(put(3))).times(2);

    assert_eq!(
        script.to_string(),
        "(Store::get(equal to 1) then (Store::get(equal to 2) or Store::put(key 3))) repeated exactly 2 times"
    );
    assert_eq!(Expectation::empty::<StoreMock>().to_string(), "nothing");
}

#[test]
fn test_services_are_deduplicated() {
    let script = get(1, "a")
        .and(ClockMock::NOW.returns(Returns::value(7)))
        .and(put(2));

    assert_eq!(
        script.services().collect::<Vec<_>>(),
        vec![Tag::of::<Store>(), Tag::of::<Clock>()]
    );
}

#[tokio::test]
async fn test_layer_answers_through_the_script() {
    let script = get(1, "a").and_then(get(2, "b"));
    let program = Effect::<Store, String, Environment>::service()
        .and_then(|store| store.get(1).zip(store.get(2)))
        .provide_layer(&script.to_layer());

    assert_eq!(
        program.run(&Environment::empty()).await,
        Ok(("a".to_string(), "b".to_string()))
    );
}

#[tokio::test]
async fn test_unsatisfied_layer_dies_when_scope_closes() {
    let script = get(1, "a").and(get(2, "b"));
    let program = Effect::<Store, String, Environment>::service()
        .and_then(|store| store.get(1))
        .provide_layer(&script.to_layer());

    let result = program.run(&Environment::empty()).await;
    assert_eq!(
        mock_defect(&result),
        Some(MockError::Unsatisfied {
            unmet: vec!["Store::get(equal to 2)".to_string()],
        })
    );
}

#[tokio::test]
async fn test_failed_run_skips_verification() {
    let script = get(1, "a").and(get(2, "b"));
    let program = Effect::<Store, String, Environment>::service()
        .and_then(|store| store.get(1).and_then(|_| Effect::fail("boom".to_string())))
        .provide_layer(&script.to_layer());

    let result: Result<(), _> = program.run(&Environment::empty()).await;
    let cause = result.unwrap_err();
    assert_eq!(cause.failure(), Some(&"boom".to_string()));
    assert!(cause.defects().is_empty());
}

#[tokio::test]
async fn test_unexpected_call_dies() {
    let program = Effect::<Store, String, Environment>::service()
        .and_then(|store| store.get(3))
        .provide_layer(&get(1, "a").to_layer());

    let result = program.run(&Environment::empty()).await;
    assert!(matches!(
        mock_defect(&result),
        Some(MockError::UnexpectedCall { method, input, .. }) if method == "Store::get" && input == "3"
    ));
}

#[tokio::test]
async fn test_scripted_failures_are_typed() {
    let script = StoreMock::GET.expect(Assertion::anything(), Returns::failure("missing".to_string()));
    let program = Effect::<Store, String, Environment>::service()
        .and_then(|store| store.get(9))
        .provide_layer(&script.to_layer());

    let cause = program.run(&Environment::empty()).await.unwrap_err();
    assert_eq!(cause.failure(), Some(&"missing".to_string()));
}

#[tokio::test]
async fn test_ordering_holds_across_services() {
    let script = ClockMock::NOW
        .returns(Returns::value(10))
        .and_then(get(1, "a"));
    let layer = script.to_layer();

    let in_order = Effect::<Clock, String, Environment>::service()
        .zip(Effect::<Store, String, Environment>::service())
        .and_then(|(clock, store)| clock.now().zip(store.get(1)))
        .provide_layer(&layer);
    assert_eq!(
        in_order.run(&Environment::empty()).await,
        Ok((10, "a".to_string()))
    );

    let out_of_order = Effect::<Store, String, Environment>::service()
        .and_then(|store| store.get(1))
        .provide_layer(&layer);
    let result = out_of_order.run(&Environment::empty()).await;
    assert!(matches!(
        mock_defect(&result),
        Some(MockError::UnexpectedCall { rejected, .. })
            if rejected == vec![Rejection::InvalidMethod {
                expected: "Clock::now".to_string(),
                actual: "Store::get".to_string(),
            }]
    ));
}

#[test]
#[traced_test]
fn test_matches_are_logged() {
    let store = proxy(&get(1, "a"));

    assert_eq!(store.try_invoke(&StoreMock::GET, 1), value("a"));
    assert!(store.try_invoke(&StoreMock::GET, 1).is_err());
    assert!(logs_contain("mock call matched"));
    assert!(logs_contain("unexpected mock call"));
}
