//! Property-based tests for repetition ranges and repeated expectations

use proptest::prelude::*;
use reservoir::layer::Environment;
use reservoir::mock::{Method, Mock, Proxy, Repetitions, Returns};
use reservoir::Effect;

#[derive(Clone)]
struct Pinger {
    proxy: Proxy,
}

impl Pinger {
    fn ping(&self) -> Effect<(), String, Environment> {
        self.proxy.invoke(&PingerMock::PING, ())
    }
}

struct PingerMock;

impl PingerMock {
    const PING: Method<PingerMock, (), (), String> = Method::new("ping");
}

impl Mock for PingerMock {
    type Service = Pinger;
    const NAME: &'static str = "Pinger";

    fn build(proxy: Proxy) -> Pinger {
        Pinger { proxy }
    }
}

fn ping_times(calls: usize) -> Effect<(), String, Environment> {
    Effect::<Pinger, String, Environment>::service().and_then(move |pinger| {
        let mut pings = Effect::unit();
        for _ in 0..calls {
            let pinger = pinger.clone();
            pings = pings.and_then(move |_| pinger.ping());
        }
        pings
    })
}

proptest! {
    #[test]
    fn prop_contains_matches_the_stepped_range(
        min in 0usize..20,
        extra in 0usize..20,
        step in 1usize..5,
        n in 0usize..60,
    ) {
        let range = Repetitions::new(min, Some(min + extra), step).unwrap();
        let expected = n >= min && n <= min + extra && (n - min) % step == 0;
        prop_assert_eq!(range.contains(n), expected);
    }

    #[test]
    fn prop_last_is_the_largest_allowed_count(
        min in 0usize..20,
        extra in 0usize..20,
        step in 1usize..5,
    ) {
        let range = Repetitions::new(min, Some(min + extra), step).unwrap();
        let last = range.last().unwrap();
        prop_assert!(range.contains(last));
        prop_assert!(!(last + 1..=min + extra).any(|n| range.contains(n)));
    }

    #[test]
    fn prop_invalid_ranges_are_rejected(min in 1usize..20, below in 1usize..20, step in 0usize..3) {
        let max = min.saturating_sub(below);
        prop_assume!(max < min || step == 0);
        prop_assert!(Repetitions::new(min, Some(max), step).is_err());
    }

    #[test]
    fn prop_at_most_accepts_exactly_up_to_its_bound(max in 0usize..6, calls in 0usize..9) {
        let script = PingerMock::PING.returns(Returns::unit()).at_most(max);
        let program = ping_times(calls).provide_layer(&script.to_layer());

        let result = tokio_test::block_on(program.run(&Environment::empty()));
        if calls <= max {
            prop_assert_eq!(result, Ok(()));
        } else {
            prop_assert!(result.unwrap_err().is_die());
        }
    }
}
