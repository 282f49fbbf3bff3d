//! Property tests: the staged overlay behaves like a plain map model.

use proptest::prelude::*;
use txnstage_testkit::prelude::*;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn reads_match_model_after_every_write(
        seed in seed_strategy(),
        ops in write_ops_strategy(24),
    ) {
        let mut h = OverlayHarness::new(&seed);
        for op in &ops {
            h.apply(op);
            h.verify_all();
        }
        h.verify_scan();
    }

    #[test]
    fn statement_sequences_commit_like_model(
        seed in seed_strategy(),
        statements in statements_strategy(6),
    ) {
        let mut h = OverlayHarness::new(&seed);
        for (ops, commit) in &statements {
            for op in ops {
                h.apply(op);
            }
            if *commit {
                h.commit_statement();
            } else {
                h.rollback_statement();
            }
            prop_assert!(h.state.buffer().is_empty());
            h.verify_all();
            h.verify_scan();
        }
        h.commit_and_verify();
    }

    #[test]
    fn arbitrary_session_input_never_panics(data in prop::collection::vec(any::<u8>(), 0..96)) {
        fuzz_session_operations(&data);
    }
}
