//! Direct HTTP path: POSTs the frame to the strip controller's own
//! `/json/state` endpoint.
//!
//! If the full per-pixel body is refused, one degraded retry sets a single
//! averaged color across three fixed zones. A dim strip beats a dark one.

use std::time::Duration;

use log::{debug, warn};
use serde::Serialize;

use crate::color::Rgb;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(2);
/// Zone count used by the degraded fallback body.
const FALLBACK_ZONES: usize = 3;

#[derive(Serialize)]
struct StateBody {
    on: bool,
    brightness: u8,
    segments: Vec<Segment>,
}

#[derive(Serialize)]
struct Segment {
    id: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    start: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<usize>,
    colors: Vec<[u8; 3]>,
}

pub struct WledClient {
    agent: ureq::Agent,
}

impl WledClient {
    pub fn new() -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(REQUEST_TIMEOUT)
            .build();
        Self { agent }
    }

    /// Send one full frame; on refusal or transport error, try the degraded
    /// body once. Returns whether anything was accepted.
    pub fn send_frame(&self, addr: &str, frame: &[Rgb], brightness: f64) -> bool {
        let body = full_body(frame, brightness);
        if self.post(addr, &body) {
            return true;
        }

        debug!("full frame refused by {addr}, trying averaged fallback");
        let fallback = fallback_body(frame, brightness);
        if self.post(addr, &fallback) {
            return true;
        }
        warn!("strip at {addr} rejected both full and fallback frames");
        false
    }

    pub fn turn_off(&self, addr: &str) -> bool {
        let body = StateBody { on: false, brightness: 0, segments: Vec::new() };
        self.post(addr, &body)
    }

    fn post(&self, addr: &str, body: &StateBody) -> bool {
        let url = format!("http://{addr}/json/state");
        match self.agent.post(&url).send_json(body) {
            Ok(_) => true,
            Err(e) => {
                debug!("POST {url} failed: {e}");
                false
            }
        }
    }
}

impl Default for WledClient {
    fn default() -> Self {
        Self::new()
    }
}

fn full_body(frame: &[Rgb], brightness: f64) -> StateBody {
    StateBody {
        on: true,
        brightness: brightness_byte(brightness),
        segments: vec![Segment {
            id: 0,
            start: Some(0),
            stop: Some(frame.len()),
            colors: frame.iter().map(|px| [px.0, px.1, px.2]).collect(),
        }],
    }
}

fn fallback_body(frame: &[Rgb], brightness: f64) -> StateBody {
    let mut colors = vec![[0u8; 3]; FALLBACK_ZONES];
    colors[0] = average_color(frame);
    StateBody {
        on: true,
        brightness: brightness_byte(brightness),
        segments: vec![Segment { id: 0, start: None, stop: None, colors }],
    }
}

fn brightness_byte(brightness: f64) -> u8 {
    (brightness.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// Mean of all lit pixels; off pixels would wash the average to near-black.
fn average_color(frame: &[Rgb]) -> [u8; 3] {
    let lit: Vec<&Rgb> = frame.iter().filter(|px| !px.is_off()).collect();
    if lit.is_empty() {
        return [0, 0, 0];
    }
    let n = lit.len() as u32;
    let sum = lit.iter().fold([0u32; 3], |acc, px| {
        [
            acc[0] + u32::from(px.0),
            acc[1] + u32::from(px.1),
            acc[2] + u32::from(px.2),
        ]
    });
    [(sum[0] / n) as u8, (sum[1] / n) as u8, (sum[2] / n) as u8]
}
