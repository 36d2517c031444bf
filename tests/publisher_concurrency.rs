use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use inference_viewer::{Frame, FramePublisher};

const WRITES: u8 = 200;

fn frame_for(value: u8) -> Frame {
    Frame::solid(64, 48, [value, value.wrapping_mul(3), value.wrapping_add(7)])
}

#[test]
fn readers_never_observe_torn_frames() {
    let publisher = Arc::new(FramePublisher::new());
    let done = Arc::new(AtomicBool::new(false));

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let publisher = publisher.clone();
            let done = done.clone();
            std::thread::spawn(move || {
                let mut observed = 0usize;
                let mut last_sequence = 0u64;
                while !done.load(Ordering::SeqCst) {
                    let Some(published) = publisher.snapshot() else {
                        continue;
                    };
                    assert!(published.sequence >= last_sequence, "sequence went backwards");
                    last_sequence = published.sequence;

                    // Every frame was built from one value; a torn read would mix two.
                    let first = published.frame.pixel(0, 0).expect("pixel");
                    let value = first[0];
                    assert_eq!(*published.frame, frame_for(value), "torn frame observed");
                    assert_eq!(u64::from(value) + 1, published.sequence);
                    observed += 1;
                }
                observed
            })
        })
        .collect();

    for value in 0..WRITES {
        let sequence = publisher.publish(frame_for(value));
        assert_eq!(sequence, u64::from(value) + 1);
    }
    done.store(true, Ordering::SeqCst);

    for reader in readers {
        reader.join().expect("reader thread");
    }
    let last = publisher.snapshot().expect("published");
    assert_eq!(*last.frame, frame_for(WRITES - 1));
}
