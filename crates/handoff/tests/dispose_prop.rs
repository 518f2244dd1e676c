use std::time::Duration;

use handoff::testing::{DisposeLedger, MockResource};
use handoff::{ChannelCapacity, GpuFrame, HandoffChannel, OfferOutcome};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Op {
    Offer,
    Take { keep: bool },
    ReleaseHeld,
    Close,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => Just(Op::Offer),
        3 => any::<bool>().prop_map(|keep| Op::Take { keep }),
        1 => Just(Op::ReleaseHeld),
        1 => Just(Op::Close),
    ]
}

fn capacity() -> impl Strategy<Value = ChannelCapacity> {
    prop_oneof![Just(ChannelCapacity::Single), Just(ChannelCapacity::Double)]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn every_frame_is_released_exactly_once(
        capacity in capacity(),
        ops in prop::collection::vec(op(), 0..64),
    ) {
        let ledger = DisposeLedger::new();
        let channel = HandoffChannel::new(capacity);
        let mut held: Vec<GpuFrame<MockResource>> = Vec::new();
        let mut next_id = 1u64;
        let mut closed = false;

        for op in ops {
            match op {
                Op::Offer => {
                    let frame = GpuFrame::new(MockResource::new(next_id, 4, 4, &ledger), None);
                    let outcome = channel.offer(frame, Duration::ZERO);
                    if closed {
                        prop_assert_eq!(outcome, OfferOutcome::Rejected);
                        prop_assert_eq!(ledger.disposals(next_id), 1);
                    }
                    next_id += 1;
                }
                Op::Take { keep } => {
                    if let Some(frame) = channel.take_latest() {
                        prop_assert_eq!(ledger.disposals(frame.handle().raw()), 0);
                        if keep {
                            held.push(frame);
                        }
                    }
                }
                Op::ReleaseHeld => held.clear(),
                Op::Close => {
                    channel.close();
                    closed = true;
                    prop_assert!(channel.is_empty());
                }
            }
            for id in 1..next_id {
                prop_assert!(ledger.disposals(id) <= 1);
            }
            prop_assert!(channel.len() <= capacity.frames());
        }

        channel.close();
        let stats = channel.stats();
        prop_assert_eq!(stats.offered, next_id - 1);
        prop_assert_eq!(stats.settled(), stats.offered);

        drop(held);
        drop(channel);
        ledger.assert_all_disposed_once();
    }
}
