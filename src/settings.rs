//! Desired/observed device configuration and reconciliation.
//!
//! The browser mutates the desired state through single-character
//! parameter codes; the lamp controller reports its state in periodic
//! hex status frames. Whenever desired state changes, one coalesced
//! command per touched group goes out. Reported divergence triggers a
//! debounced resend, so the pair converges even when the link drops
//! bytes.

use std::time::{Duration, Instant};

use serde::Serialize;

use crate::serial::{CommandGroup, CommandSink};

/// Inbound status frame: 26 hex digits plus the newline terminator.
pub const STATUS_FRAME_LEN: usize = 27;

/// Quiet period required before a divergence-driven resend.
const RESEND_DEBOUNCE: Duration = Duration::from_secs(1);

/// Parameter codes accepted by `PUT /params`, one letter each.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamCode {
    RedMin,
    RedMax,
    GreenMin,
    GreenMax,
    BlueMin,
    BlueMax,
    Brightness,
    FrameSkip,
    Fps,
    Directory,
    Video,
    Frame,
}

/// Static code table: single-character wire code to field.
pub const PARAM_CODES: &[(u8, ParamCode)] = &[
    (b'r', ParamCode::RedMin),
    (b'R', ParamCode::RedMax),
    (b'g', ParamCode::GreenMin),
    (b'G', ParamCode::GreenMax),
    (b'b', ParamCode::BlueMin),
    (b'B', ParamCode::BlueMax),
    (b'A', ParamCode::Brightness),
    (b's', ParamCode::FrameSkip),
    (b'S', ParamCode::Fps),
    (b'd', ParamCode::Directory),
    (b'v', ParamCode::Video),
    (b'p', ParamCode::Frame),
];

fn code_for(key: &str) -> Option<ParamCode> {
    let [byte] = key.as_bytes() else { return None };
    PARAM_CODES
        .iter()
        .find(|(code, _)| code == byte)
        .map(|&(_, code)| code)
}

impl ParamCode {
    fn group(self) -> CommandGroup {
        match self {
            ParamCode::RedMin
            | ParamCode::RedMax
            | ParamCode::GreenMin
            | ParamCode::GreenMax
            | ParamCode::BlueMin
            | ParamCode::BlueMax
            | ParamCode::Brightness => CommandGroup::Color,
            ParamCode::FrameSkip | ParamCode::Fps => CommandGroup::Speed,
            ParamCode::Directory | ParamCode::Video | ParamCode::Frame => CommandGroup::Video,
        }
    }

    fn in_range(self, value: i64) -> bool {
        match self {
            ParamCode::FrameSkip => (-128..=127).contains(&value),
            ParamCode::Frame => (0..=0xffff).contains(&value),
            _ => (0..=255).contains(&value),
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum UpdateError {
    Json,
    UnknownKey,
    NotAnInteger,
    OutOfRange,
}

/// A validated `PUT /params` body.
#[derive(Debug)]
pub struct ParamUpdate {
    changes: Vec<(ParamCode, i64)>,
}

impl ParamUpdate {
    /// Body must be a flat JSON object mapping whitelisted one-letter
    /// codes to in-range integers; anything else is rejected whole.
    pub fn from_json(body: &[u8]) -> Result<Self, UpdateError> {
        let map: serde_json::Map<String, serde_json::Value> =
            serde_json::from_slice(body).map_err(|_| UpdateError::Json)?;
        let mut changes = Vec::with_capacity(map.len());
        for (key, value) in &map {
            let code = code_for(key).ok_or(UpdateError::UnknownKey)?;
            let value = value.as_i64().ok_or(UpdateError::NotAnInteger)?;
            if !code.in_range(value) {
                return Err(UpdateError::OutOfRange);
            }
            changes.push((code, value));
        }
        Ok(Self { changes })
    }
}

/// One parsed status frame from the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusReport {
    pub red_min: u8,
    pub red_max: u8,
    pub green_min: u8,
    pub green_max: u8,
    pub blue_min: u8,
    pub blue_max: u8,
    pub frame_skip: i16,
    pub fps: u8,
    pub frame: u16,
    pub directory: u8,
    pub current_video: u8,
    pub video: u8,
}

impl StatusReport {
    /// Fixed-offset hex fields; any length or field mismatch discards
    /// the frame.
    pub fn parse(frame: &[u8]) -> Option<Self> {
        if frame.len() != STATUS_FRAME_LEN || frame[STATUS_FRAME_LEN - 1] != b'\n' {
            return None;
        }
        let hex2 = |at: usize| -> Option<u8> {
            let text = std::str::from_utf8(&frame[at..at + 2]).ok()?;
            u8::from_str_radix(text, 16).ok()
        };
        let hex4 = |at: usize| -> Option<u16> {
            let text = std::str::from_utf8(&frame[at..at + 4]).ok()?;
            u16::from_str_radix(text, 16).ok()
        };
        Some(Self {
            red_min: hex2(0)?,
            red_max: hex2(2)?,
            green_min: hex2(4)?,
            green_max: hex2(6)?,
            blue_min: hex2(8)?,
            blue_max: hex2(10)?,
            frame_skip: hex2(12)? as i16 - 128,
            fps: hex2(14)?,
            frame: hex4(16)?,
            directory: hex2(20)?,
            current_video: hex2(22)?,
            video: hex2(24)?,
        })
    }
}

/// Snapshot served as JSON by the `/params` routes. The `v` key carries
/// the device-reported current video; the `PUT` code `v` selects one.
#[derive(Debug, Serialize)]
pub struct Snapshot {
    pub r: u8,
    #[serde(rename = "R")]
    pub r_max: u8,
    pub g: u8,
    #[serde(rename = "G")]
    pub g_max: u8,
    pub b: u8,
    #[serde(rename = "B")]
    pub b_max: u8,
    #[serde(rename = "A")]
    pub brightness: u8,
    pub s: i16,
    #[serde(rename = "S")]
    pub fps: u8,
    pub d: u8,
    pub p: u16,
    pub v: u8,
}

pub struct DeviceSettings {
    red_min: u8,
    red_max: u8,
    green_min: u8,
    green_max: u8,
    blue_min: u8,
    blue_max: u8,
    brightness: u8,
    frame_skip: i16,
    fps: u8,
    directory: u8,
    video: u8,
    frame: u16,
    current_video: u8,
    observed: Option<StatusReport>,
    last_cmd_sent: Instant,
    first_status_seen: bool,
}

impl DeviceSettings {
    pub fn new() -> Self {
        Self {
            red_min: 0,
            red_max: 255,
            green_min: 0,
            green_max: 255,
            blue_min: 0,
            blue_max: 255,
            brightness: 255,
            frame_skip: 0,
            fps: 0,
            directory: 0,
            video: 0,
            frame: 0,
            current_video: 0,
            observed: None,
            last_cmd_sent: Instant::now(),
            first_status_seen: false,
        }
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            r: self.red_min,
            r_max: self.red_max,
            g: self.green_min,
            g_max: self.green_max,
            b: self.blue_min,
            b_max: self.blue_max,
            brightness: self.brightness,
            s: self.frame_skip,
            fps: self.fps,
            d: self.directory,
            p: self.frame,
            v: self.current_video,
        }
    }

    /// Merge a validated update, then emit one coalesced command per
    /// touched group.
    pub fn apply(&mut self, update: &ParamUpdate, sink: &mut dyn CommandSink) {
        let now = Instant::now();
        let mut color = false;
        let mut speed = false;
        let mut video = false;
        for &(code, value) in &update.changes {
            if self.set(code, value) {
                match code.group() {
                    CommandGroup::Color => color = true,
                    CommandGroup::Speed => speed = true,
                    CommandGroup::Video => video = true,
                }
            }
        }
        if color {
            self.send_color(now, sink);
        }
        if speed {
            self.send_speed(now, sink);
        }
        if video {
            self.send_video(now, sink);
        }
    }

    fn set(&mut self, code: ParamCode, value: i64) -> bool {
        fn update<T: PartialEq>(field: &mut T, value: T) -> bool {
            if *field == value {
                false
            } else {
                *field = value;
                true
            }
        }
        match code {
            ParamCode::RedMin => update(&mut self.red_min, value as u8),
            ParamCode::RedMax => update(&mut self.red_max, value as u8),
            ParamCode::GreenMin => update(&mut self.green_min, value as u8),
            ParamCode::GreenMax => update(&mut self.green_max, value as u8),
            ParamCode::BlueMin => update(&mut self.blue_min, value as u8),
            ParamCode::BlueMax => update(&mut self.blue_max, value as u8),
            ParamCode::Brightness => update(&mut self.brightness, value as u8),
            ParamCode::FrameSkip => update(&mut self.frame_skip, value as i16),
            ParamCode::Fps => update(&mut self.fps, value as u8),
            ParamCode::Directory => update(&mut self.directory, value as u8),
            ParamCode::Video => update(&mut self.video, value as u8),
            ParamCode::Frame => update(&mut self.frame, value as u16),
        }
    }

    /// Physically-sent color value: bound scaled by brightness.
    fn dim(&self, value: u8) -> u8 {
        (u16::from(value) * u16::from(self.brightness) / 255) as u8
    }

    fn send_color(&mut self, now: Instant, sink: &mut dyn CommandSink) {
        let frame = format!(
            "C{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}\n",
            self.dim(self.red_min),
            self.dim(self.red_max),
            self.dim(self.green_min),
            self.dim(self.green_max),
            self.dim(self.blue_min),
            self.dim(self.blue_max),
        );
        self.dispatch(CommandGroup::Color, frame.into_bytes(), now, sink);
    }

    fn send_speed(&mut self, now: Instant, sink: &mut dyn CommandSink) {
        let frame = format!("S{:02x}{:02x}\n", (self.frame_skip + 128) as u8, self.fps);
        self.dispatch(CommandGroup::Speed, frame.into_bytes(), now, sink);
    }

    fn send_video(&mut self, now: Instant, sink: &mut dyn CommandSink) {
        let frame = format!(
            "V{:02x}{:02x}{:04x}\n",
            self.directory, self.video, self.frame
        );
        self.dispatch(CommandGroup::Video, frame.into_bytes(), now, sink);
    }

    fn dispatch(
        &mut self,
        group: CommandGroup,
        frame: Vec<u8>,
        now: Instant,
        sink: &mut dyn CommandSink,
    ) {
        sink.send_command(group, frame);
        self.last_cmd_sent = now;
    }

    pub fn handle_status_frame(&mut self, frame: &[u8], sink: &mut dyn CommandSink) {
        self.handle_status_frame_at(frame, Instant::now(), sink);
    }

    /// Status-frame intake with an explicit clock, so the debounce is
    /// testable.
    pub fn handle_status_frame_at(
        &mut self,
        frame: &[u8],
        now: Instant,
        sink: &mut dyn CommandSink,
    ) {
        let Some(report) = StatusReport::parse(frame) else {
            // Corrupt frames are discarded; the next one re-syncs us.
            return;
        };

        if !self.first_status_seen {
            // Adopt the controller-held values at boot instead of
            // clobbering them with our defaults.
            self.first_status_seen = true;
            self.red_min = report.red_min;
            self.red_max = report.red_max;
            self.green_min = report.green_min;
            self.green_max = report.green_max;
            self.blue_min = report.blue_min;
            self.blue_max = report.blue_max;
            self.frame_skip = report.frame_skip;
            self.fps = report.fps;
            self.directory = report.directory;
        }

        // Playback position and current video follow the device.
        self.frame = report.frame;
        self.current_video = report.current_video;
        self.observed = Some(report);

        if now.duration_since(self.last_cmd_sent) > RESEND_DEBOUNCE {
            let wanted = [
                self.dim(self.red_min),
                self.dim(self.green_min),
                self.dim(self.blue_min),
                self.dim(self.red_max),
                self.dim(self.green_max),
                self.dim(self.blue_max),
            ];
            let got = [
                report.red_min,
                report.green_min,
                report.blue_min,
                report.red_max,
                report.green_max,
                report.blue_max,
            ];
            if got != wanted {
                self.send_color(now, sink);
            }
            if report.frame_skip != self.frame_skip || report.fps != self.fps {
                self.send_speed(now, sink);
            }
            if report.directory != self.directory {
                self.send_video(now, sink);
            }
        }
    }
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_report_fixed_offsets() {
        let frame = b"0aff14ff1eff8214012305080b\n";
        let report = StatusReport::parse(frame).unwrap();
        assert_eq!(report.red_min, 0x0a);
        assert_eq!(report.red_max, 0xff);
        assert_eq!(report.green_min, 0x14);
        assert_eq!(report.blue_min, 0x1e);
        assert_eq!(report.frame_skip, 0x82 - 128);
        assert_eq!(report.fps, 0x14);
        assert_eq!(report.frame, 0x0123);
        assert_eq!(report.directory, 0x05);
        assert_eq!(report.current_video, 0x08);
        assert_eq!(report.video, 0x0b);
    }

    #[test]
    fn status_report_rejects_bad_length_and_bad_hex() {
        assert!(StatusReport::parse(b"0aff14ff1eff8214012305080b").is_none());
        assert!(StatusReport::parse(b"zzff14ff1eff8214012305080b\n").is_none());
    }
}
