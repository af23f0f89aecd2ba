use bytes::Bytes;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tello_messenger::{lock, Lifecycle, ReceiverState, RelayEvent, RelayService, TransportError};
use tello_proto::VideoFrame;
use tokio::sync::broadcast;
use tokio::time::{interval_at, Instant};
use tracing::{debug, info, warn};

const EVENT_CAPACITY: usize = 256;
const MAX_FRAME_RATE: f64 = 1_000.0;

/// Supplies the payload for each frame.
pub trait FrameSource: Send + 'static {
    fn next_sample(&mut self, sequence: u64) -> Result<Bytes, TransportError>;
}

/// The same placeholder payload for every frame.
#[derive(Debug, Clone)]
pub struct SyntheticSource {
    sample: Bytes,
}

impl Default for SyntheticSource {
    fn default() -> Self {
        Self { sample: Bytes::from_static(b"This is fake frame data.") }
    }
}

impl FrameSource for SyntheticSource {
    fn next_sample(&mut self, _sequence: u64) -> Result<Bytes, TransportError> {
        Ok(self.sample.clone())
    }
}

/// Emits frames at a fixed rate while started.
///
/// `stop` is observed before the next frame is produced; the wait already in
/// progress is not cut short, so shutdown takes up to one frame interval.
pub struct VideoServer {
    frame_rate: f64,
    source: Arc<Mutex<Box<dyn FrameSource>>>,
    events: broadcast::Sender<RelayEvent<VideoFrame>>,
    running: Mutex<Option<Arc<AtomicBool>>>,
}

impl VideoServer {
    /// `frame_rate` is clamped to 1..=1000 fps; NaN means 1 fps.
    pub fn new(frame_rate: f64, source: Box<dyn FrameSource>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let frame_rate = if frame_rate.is_nan() {
            1.0
        } else {
            frame_rate.clamp(1.0, MAX_FRAME_RATE)
        };
        Self {
            frame_rate,
            source: Arc::new(Mutex::new(source)),
            events,
            running: Mutex::new(None),
        }
    }

    pub fn synthetic(frame_rate: f64) -> Self {
        Self::new(frame_rate, Box::new(SyntheticSource::default()))
    }

    pub fn frame_rate(&self) -> f64 {
        self.frame_rate
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.frame_rate)
    }
}

impl Lifecycle for VideoServer {
    fn start(&self) {
        let mut running = lock(&self.running);
        if running.is_some() {
            return;
        }
        let flag = Arc::new(AtomicBool::new(true));
        *running = Some(flag.clone());

        info!(fps = self.frame_rate, "video: started");
        tokio::spawn(produce_frames(
            self.frame_rate,
            self.frame_interval(),
            self.source.clone(),
            self.events.clone(),
            flag,
        ));
    }

    fn stop(&self) {
        if let Some(flag) = lock(&self.running).take() {
            flag.store(false, Ordering::SeqCst);
            info!("video: stopping");
        }
    }

    fn state(&self) -> ReceiverState {
        if lock(&self.running).is_some() {
            ReceiverState::Listening
        } else {
            ReceiverState::Stopped
        }
    }
}

impl RelayService<VideoFrame> for VideoServer {
    fn subscribe(&self) -> broadcast::Receiver<RelayEvent<VideoFrame>> {
        self.events.subscribe()
    }
}

impl Drop for VideoServer {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn produce_frames(
    frame_rate: f64,
    period: Duration,
    source: Arc<Mutex<Box<dyn FrameSource>>>,
    events: broadcast::Sender<RelayEvent<VideoFrame>>,
    running: Arc<AtomicBool>,
) {
    let mut ticks = interval_at(Instant::now() + period, period);
    let mut sequence: u64 = 0;

    loop {
        ticks.tick().await;
        if !running.load(Ordering::SeqCst) {
            break;
        }
        let sample = lock(&source).next_sample(sequence);
        match sample {
            Ok(payload) => {
                let frame = VideoFrame::new(payload, sequence, frame_rate);
                let _ = events.send(RelayEvent::Message(frame));
                sequence += 1;
            }
            Err(e) => {
                warn!(sequence, error = %e, "video: frame failed");
                let _ = events.send(RelayEvent::Exception(e));
            }
        }
    }
    debug!(frames = sequence, "video: stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frames(rx: &mut broadcast::Receiver<RelayEvent<VideoFrame>>) -> Vec<VideoFrame> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            if let RelayEvent::Message(f) = ev {
                out.push(f);
            }
        }
        out
    }

    #[tokio::test(start_paused = true)]
    async fn cadence_matches_frame_rate() {
        let server = VideoServer::synthetic(30.0);
        let mut rx = server.subscribe();
        server.start();
        tokio::time::sleep(Duration::from_secs(2)).await;
        server.stop();

        let got = frames(&mut rx);
        assert!((got.len() as i64 - 60).abs() <= 1, "got {} frames", got.len());
        for (i, f) in got.iter().enumerate() {
            assert_eq!(f.sequence, i as u64);
        }
        assert_eq!(got[30].timestamp, Duration::from_secs(1));
        assert_eq!(got[0].payload, "This is fake frame data.");
    }

    #[tokio::test(start_paused = true)]
    async fn start_is_idempotent_and_stop_halts() {
        let server = VideoServer::synthetic(10.0);
        let mut rx = server.subscribe();
        server.start();
        server.start();
        tokio::time::sleep(Duration::from_millis(1_050)).await;
        server.stop();
        assert_eq!(server.state(), ReceiverState::Stopped);

        let got = frames(&mut rx);
        assert_eq!(got.len(), 10);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(frames(&mut rx).is_empty());
    }

    struct Flaky;

    impl FrameSource for Flaky {
        fn next_sample(&mut self, sequence: u64) -> Result<Bytes, TransportError> {
            static FAILED: AtomicBool = AtomicBool::new(false);
            if sequence == 2 && !FAILED.swap(true, Ordering::SeqCst) {
                return Err(TransportError::Receive("encoder stall".into()));
            }
            Ok(Bytes::from(sequence.to_string()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn failed_frame_is_reported_and_sequence_continues() {
        let server = VideoServer::new(10.0, Box::new(Flaky));
        let mut rx = server.subscribe();
        server.start();
        tokio::time::sleep(Duration::from_millis(650)).await;
        server.stop();

        let mut seqs = Vec::new();
        let mut errors = 0;
        while let Ok(ev) = rx.try_recv() {
            match ev {
                RelayEvent::Message(f) => seqs.push(f.sequence),
                RelayEvent::Exception(_) => errors += 1,
            }
        }
        assert_eq!(errors, 1);
        assert_eq!(seqs, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test(start_paused = true)]
    async fn unrepresentable_rates_still_produce_frames() {
        for rate in [f64::INFINITY, f64::NAN, 0.0] {
            let server = VideoServer::synthetic(rate);
            assert!(server.frame_interval() >= Duration::from_millis(1), "rate {rate}");
            let mut rx = server.subscribe();
            server.start();
            tokio::time::sleep(server.frame_interval() * 7 / 2).await;
            server.stop();
            assert_eq!(frames(&mut rx).len(), 3, "rate {rate}");
        }
    }
}
