//! Per-strip transport: rate limiting, the in-flight guard, and protocol
//! selection between the streaming relay and the direct HTTP path.
//!
//! Sends never block the caller's tick. Each accepted frame is handed to a
//! short-lived worker thread; while one is outstanding, new frames are
//! dropped rather than queued. Lost frames are fine, reordered ones are not.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, trace};

use crate::color::Rgb;
use crate::frame::{generate_frame, PixelFrame};
use crate::pattern::{DeviceConfig, PlayheadState, Protocol, StepPattern};
use crate::relay::RelayClient;
use crate::wled::WledClient;

pub struct StripTransport {
    pub cfg: DeviceConfig,
    relay: Arc<Mutex<RelayClient>>,
    wled: Arc<WledClient>,
    in_flight: Arc<AtomicBool>,
    /// Cleared on disconnect so in-flight results are discarded.
    live: Arc<AtomicBool>,
    last_send: Option<Instant>,
    /// Whether the mute-off command already went out for the current mute.
    muted_off: bool,
}

impl StripTransport {
    pub fn new(cfg: DeviceConfig) -> Self {
        Self::with_relay(cfg, RelayClient::new())
    }

    pub fn with_relay(cfg: DeviceConfig, relay: RelayClient) -> Self {
        Self {
            cfg,
            relay: Arc::new(Mutex::new(relay)),
            wled: Arc::new(WledClient::new()),
            in_flight: Arc::new(AtomicBool::new(false)),
            live: Arc::new(AtomicBool::new(true)),
            last_send: None,
            muted_off: false,
        }
    }

    /// Render and dispatch one frame for this strip.
    ///
    /// Returns whether a frame was accepted for sending; delivery itself is
    /// asynchronous and failures surface in the log, not here. Muted strips
    /// (unless soloed) are turned off rather than sent data.
    pub fn update_strip(
        &mut self,
        pattern: &StepPattern,
        playhead: &PlayheadState,
        lane_color: Rgb,
        muted: bool,
        solo: bool,
    ) -> bool {
        if !self.live.load(Ordering::SeqCst) {
            return false;
        }
        if muted && !solo {
            // turn the strip off once, then stay quiet until unmuted
            if self.muted_off {
                return false;
            }
            self.muted_off = self.turn_off();
            return self.muted_off;
        }
        self.muted_off = false;

        let interval = Duration::from_secs_f64(1.0 / self.cfg.update_rate);
        if let Some(last) = self.last_send {
            if last.elapsed() < interval {
                trace!("strip {} rate limited, frame dropped", self.cfg.address);
                return false;
            }
        }

        let frame = generate_frame(pattern, playhead, lane_color, &self.cfg);
        self.dispatch(frame)
    }

    /// Queue a blank-strip command through the configured protocol.
    ///
    /// Returns immediately like frame sends do: the command runs on its own
    /// worker, serialized behind any in-flight send by the relay lock, and
    /// a delivery failure surfaces in the log.
    pub fn turn_off(&mut self) -> bool {
        self.spawn_off(false)
    }

    /// Diagnostic sweep: full-saturation hue gradient rotated by `phase`.
    /// Goes through the same transport selection as real frames.
    pub fn rainbow_sweep(&mut self, phase: f64) -> bool {
        let n = self.cfg.led_count;
        let frame: PixelFrame = (0..n)
            .map(|i| Rgb::hsv((i as f64 / n.max(1) as f64 + phase).fract(), 1.0, 1.0))
            .collect();
        self.dispatch(frame)
    }

    /// Stop further output. In-flight sends finish or time out on their own;
    /// their results are discarded. The final off command and the relay
    /// teardown run on a worker so the caller's tick is never held up.
    pub fn disconnect(&mut self) {
        self.live.store(false, Ordering::SeqCst);
        self.spawn_off(true);
    }

    fn spawn_off(&self, close_relay: bool) -> bool {
        let relay = Arc::clone(&self.relay);
        let wled = Arc::clone(&self.wled);
        let addr = self.cfg.address.clone();
        let protocol = self.cfg.protocol;
        let led_count = self.cfg.led_count;

        thread::spawn(move || {
            let mut relay = relay.lock().unwrap();
            if !off_blocking(protocol, &mut relay, &wled, &addr, led_count) {
                debug!("off command to {addr} was not delivered");
            }
            if close_relay {
                relay.disconnect();
            }
        });
        true
    }

    fn dispatch(&mut self, frame: PixelFrame) -> bool {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            trace!("send to {} in flight, frame dropped", self.cfg.address);
            return false;
        }
        self.last_send = Some(Instant::now());

        let relay = Arc::clone(&self.relay);
        let wled = Arc::clone(&self.wled);
        let busy = Arc::clone(&self.in_flight);
        let live = Arc::clone(&self.live);
        let addr = self.cfg.address.clone();
        let protocol = self.cfg.protocol;
        let brightness = self.cfg.brightness;

        thread::spawn(move || {
            let ok = {
                let mut relay = relay.lock().unwrap();
                send_blocking(protocol, &mut relay, &wled, &addr, &frame, brightness)
            };
            if !ok && live.load(Ordering::SeqCst) {
                debug!("frame to {addr} was not delivered");
            }
            busy.store(false, Ordering::SeqCst);
        });
        true
    }
}

/// One send, with exactly one fallback tier: a failed relay send falls back
/// to the direct HTTP path before giving up.
fn send_blocking(
    protocol: Protocol,
    relay: &mut RelayClient,
    wled: &WledClient,
    addr: &str,
    frame: &[Rgb],
    brightness: f64,
) -> bool {
    match protocol {
        Protocol::Streaming => {
            // The relay message has no brightness field, so bake it in.
            let scaled: Vec<Rgb> = frame.iter().map(|px| px.scale(brightness)).collect();
            if relay.send_frame(addr, &scaled) {
                return true;
            }
            debug!("relay path failed for {addr}, trying direct path");
            wled.send_frame(addr, frame, brightness)
        }
        Protocol::Direct => wled.send_frame(addr, frame, brightness),
    }
}

/// Blank the strip: a black frame over the relay, falling back to (or going
/// straight through) the direct path's off command.
fn off_blocking(
    protocol: Protocol,
    relay: &mut RelayClient,
    wled: &WledClient,
    addr: &str,
    led_count: usize,
) -> bool {
    match protocol {
        Protocol::Streaming => {
            let black = vec![Rgb::OFF; led_count];
            relay.send_frame(addr, &black) || wled.turn_off(addr)
        }
        Protocol::Direct => wled.turn_off(addr),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::FrameMode;
    use std::io::{Read, Write};
    use std::net::TcpListener;

    /// Minimal one-shot HTTP server that records whether it was hit.
    fn spawn_http_ok() -> (u16, std::thread::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = vec![0u8; 65536];
            let mut req = String::new();
            loop {
                let n = stream.read(&mut buf).unwrap();
                req.push_str(&String::from_utf8_lossy(&buf[..n]));
                if let Some(head_end) = req.find("\r\n\r\n") {
                    let content_length = req
                        .lines()
                        .find_map(|l| l.to_ascii_lowercase().strip_prefix("content-length:").map(str::to_owned))
                        .and_then(|v| v.trim().parse::<usize>().ok())
                        .unwrap_or(0);
                    if req.len() >= head_end + 4 + content_length {
                        break;
                    }
                }
            }
            stream
                .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 0\r\n\r\n")
                .unwrap();
            req
        });
        (port, handle)
    }

    #[test]
    fn relay_failure_falls_back_to_direct_path() {
        let _ = env_logger::builder().is_test(true).try_init();
        let (port, server) = spawn_http_ok();
        // no relay listens on port 1, so the streaming path must fail fast
        let mut relay = RelayClient::with_ports(&[1]);
        let wled = WledClient::new();
        let addr = format!("127.0.0.1:{port}");

        let ok = send_blocking(
            Protocol::Streaming,
            &mut relay,
            &wled,
            &addr,
            &[Rgb::RED, Rgb::OFF],
            1.0,
        );
        assert!(ok, "HTTP path should have been attempted and accepted");

        let req = server.join().unwrap();
        assert!(req.starts_with("POST /json/state"));
        assert!(req.contains("\"segments\""));
    }

    #[test]
    fn rate_limit_drops_back_to_back_frames() {
        let mut cfg = DeviceConfig::new("127.0.0.1:1", 16);
        cfg.protocol = Protocol::Direct;
        cfg.mode = FrameMode::Static;
        cfg.set_update_rate(30.0);
        let mut strip = StripTransport::with_relay(cfg, RelayClient::with_ports(&[1]));

        let pattern = StepPattern::new(1, 16);
        let playhead = PlayheadState::stopped();
        assert!(strip.update_strip(&pattern, &playhead, Rgb::RED, false, false));
        assert!(!strip.update_strip(&pattern, &playhead, Rgb::RED, false, false));
    }

    /// Server that accepts connections but never sends a byte back, pinning
    /// any send against its full timeout.
    fn spawn_http_stall() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        std::thread::spawn(move || {
            while let Ok((stream, _)) = listener.accept() {
                std::thread::spawn(move || {
                    std::thread::sleep(Duration::from_secs(10));
                    drop(stream);
                });
            }
        });
        port
    }

    #[test]
    fn muted_tick_returns_without_blocking() {
        let port = spawn_http_stall();
        let mut cfg = DeviceConfig::new(format!("127.0.0.1:{port}"), 16);
        cfg.protocol = Protocol::Direct;
        let mut strip = StripTransport::with_relay(cfg, RelayClient::with_ports(&[1]));

        let pattern = StepPattern::new(1, 16);
        let start = Instant::now();
        assert!(strip.update_strip(&pattern, &PlayheadState::stopped(), Rgb::RED, true, false));
        assert!(
            start.elapsed() < Duration::from_millis(250),
            "muted tick blocked the caller for {:?}",
            start.elapsed()
        );
    }

    #[test]
    fn in_flight_send_drops_the_next_frame() {
        let port = spawn_http_stall();
        let mut cfg = DeviceConfig::new(format!("127.0.0.1:{port}"), 16);
        cfg.protocol = Protocol::Direct;
        // rate window far shorter than the stalled send
        cfg.set_update_rate(1000.0);
        let mut strip = StripTransport::with_relay(cfg, RelayClient::with_ports(&[1]));

        let pattern = StepPattern::new(1, 16);
        let playhead = PlayheadState::stopped();
        assert!(strip.update_strip(&pattern, &playhead, Rgb::RED, false, false));

        // well past the rate limit, so only the in-flight guard can drop it
        std::thread::sleep(Duration::from_millis(50));
        assert!(!strip.update_strip(&pattern, &playhead, Rgb::RED, false, false));
    }

    #[test]
    fn mute_latches_after_one_dispatched_off() {
        let mut cfg = DeviceConfig::new("127.0.0.1:1", 16);
        cfg.protocol = Protocol::Direct;
        let mut strip = StripTransport::with_relay(cfg, RelayClient::with_ports(&[1]));

        let pattern = StepPattern::new(1, 16);
        let playhead = PlayheadState::stopped();
        // transition dispatches the off command, later muted ticks stay quiet
        assert!(strip.update_strip(&pattern, &playhead, Rgb::RED, true, false));
        assert!(!strip.update_strip(&pattern, &playhead, Rgb::RED, true, false));
        // unmuting resumes frames and re-arms the latch
        assert!(strip.update_strip(&pattern, &playhead, Rgb::RED, false, false));
        assert!(strip.update_strip(&pattern, &playhead, Rgb::RED, true, false));
    }

    #[test]
    fn disconnected_strip_accepts_nothing() {
        let mut cfg = DeviceConfig::new("127.0.0.1:1", 16);
        cfg.protocol = Protocol::Direct;
        let mut strip = StripTransport::with_relay(cfg, RelayClient::with_ports(&[1]));
        strip.disconnect();

        let pattern = StepPattern::new(1, 16);
        assert!(!strip.update_strip(&pattern, &PlayheadState::stopped(), Rgb::RED, false, false));
    }
}
