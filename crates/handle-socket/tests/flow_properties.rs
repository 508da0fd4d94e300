//! Property-based tests for freeze/thaw delivery.
//!
//! Properties verified:
//! 1. What the consumer has seen is always a prefix of what arrived
//! 2. After a final resume everything that arrived is delivered once
//! 3. Chunks arriving while unfrozen are delivered unmodified, in order
//! 4. The engine is throttled exactly while the socket holds data back
//! 5. Bytes are only pending while the engine is throttled
//! 6. Pause/resume with nothing arriving never reaches the consumer

mod common;

use common::{arrive, model_socket};
use handle_socket::FreezeState;
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Op {
    Arrive(Vec<u8>),
    Pause,
    Resume,
    Pump,
}

// ────────────────────────────────────────────────────────────────────
// Strategies
// ────────────────────────────────────────────────────────────────────

fn arb_chunk() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 1..24)
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => arb_chunk().prop_map(Op::Arrive),
        2 => Just(Op::Pause),
        2 => Just(Op::Resume),
        2 => Just(Op::Pump),
    ]
}

fn arb_ops() -> impl Strategy<Value = Vec<Op>> {
    prop::collection::vec(arb_op(), 0..80)
}

// ────────────────────────────────────────────────────────────────────
// Properties
// ────────────────────────────────────────────────────────────────────

proptest! {
    #[test]
    fn delivered_is_prefix_then_complete(ops in arb_ops()) {
        let (mut socket, model, seen) = model_socket();
        let mut arrived = Vec::new();

        for op in ops {
            match op {
                Op::Arrive(chunk) => {
                    if model.borrow().can_read() {
                        arrive(&mut socket, &model, &chunk);
                        arrived.extend_from_slice(&chunk);
                    }
                }
                Op::Pause => socket.set_frozen(true),
                Op::Resume => socket.set_frozen(false),
                Op::Pump => { socket.run_pending(); }
            }
            let delivered = seen.borrow().bytes.clone();
            prop_assert!(arrived.starts_with(&delivered));
        }

        socket.set_frozen(false);
        while socket.run_pending() > 0 {}
        prop_assert_eq!(&seen.borrow().bytes, &arrived);
        prop_assert_eq!(socket.freeze_state(), FreezeState::Unfrozen);
        prop_assert_eq!(socket.pending_bytes(), 0);
        prop_assert!(!model.borrow().throttled);
    }

    #[test]
    fn unfrozen_chunks_are_unmodified(chunks in prop::collection::vec(arb_chunk(), 0..32)) {
        let (mut socket, model, seen) = model_socket();
        for chunk in &chunks {
            arrive(&mut socket, &model, chunk);
        }
        prop_assert_eq!(&seen.borrow().chunks, &chunks);
        prop_assert_eq!(model.borrow().unthrottles, 0);
    }

    #[test]
    fn throttle_tracks_held_data(ops in arb_ops()) {
        let (mut socket, model, _seen) = model_socket();
        for op in ops {
            match op {
                Op::Arrive(chunk) => {
                    if model.borrow().can_read() {
                        arrive(&mut socket, &model, &chunk);
                    }
                }
                Op::Pause => socket.set_frozen(true),
                Op::Resume => socket.set_frozen(false),
                Op::Pump => { socket.run_pending(); }
            }
            let state = socket.freeze_state();
            prop_assert_eq!(state.engine_throttled(), model.borrow().throttled, "state {}", state);
            if socket.pending_bytes() > 0 {
                prop_assert!(state.engine_throttled());
            }
        }
    }

    #[test]
    fn empty_freeze_cycles_are_silent(cycles in 1usize..20) {
        let (mut socket, model, seen) = model_socket();
        for _ in 0..cycles {
            socket.set_frozen(true);
            socket.set_frozen(false);
            socket.run_pending();
        }
        prop_assert!(seen.borrow().chunks.is_empty());
        prop_assert_eq!(socket.freeze_state(), FreezeState::Unfrozen);
        prop_assert_eq!(model.borrow().unthrottles, 0);
    }
}
