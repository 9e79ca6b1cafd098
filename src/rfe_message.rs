//! Framing and parsing of what an RF Explorer sends over the serial line.
//!
//! Text messages end with `\r\n`. Sweep frames start with `$S` (one length byte),
//! `$s` (length byte counts blocks of 16 samples) or `$z` (two length bytes, big endian)
//! followed by one raw byte per sample, so they have to be cut by length rather than
//! by line ending.

const RESET_BANNER: &str = "(C) Ariel Rocholl";
const CONFIG_PREFIX: &str = "#C2-F:";
const MODEL_PREFIX: &str = "#C2-M:";

/// Main model code used by RF Explorer signal generators.
pub const MODEL_SIGNAL_GENERATOR: u16 = 60;
/// Mode reported in the configuration while running as spectrum analyzer.
pub const MODE_SPECTRUM_ANALYZER: u16 = 0;

/// Lines longer than this without a terminator are garbage and get discarded.
const MAX_PENDING_BYTES: usize = 8192;

/// Analyzer configuration as reported by `#C2-F:`.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalyzerConfig {
    pub start_khz: f64,
    pub step_hz: f64,
    pub amplitude_top_dbm: i32,
    pub amplitude_bottom_dbm: i32,
    pub sweep_points: u32,
    pub expansion_active: bool,
    pub mode: u16,
    pub min_frequency_khz: f64,
    pub max_frequency_khz: f64,
    pub max_span_khz: f64,
}

impl AnalyzerConfig {
    pub fn start_mhz(&self) -> f64 {
        self.start_khz / 1000.0
    }

    pub fn step_mhz(&self) -> f64 {
        self.step_hz / 1_000_000.0
    }

    fn parse(fields: &str) -> Option<Self> {
        let fields: Vec<&str> = fields.split(',').map(str::trim).collect();
        if fields.len() < 10 {
            return None;
        }

        Some(Self {
            start_khz: fields[0].parse().ok()?,
            step_hz: fields[1].parse().ok()?,
            amplitude_top_dbm: fields[2].parse().ok()?,
            amplitude_bottom_dbm: fields[3].parse().ok()?,
            sweep_points: fields[4].parse().ok()?,
            expansion_active: fields[5] == "1",
            mode: fields[6].parse().ok()?,
            min_frequency_khz: fields[7].parse().ok()?,
            max_frequency_khz: fields[8].parse().ok()?,
            max_span_khz: fields[9].parse().ok()?,
        })
    }
}

/// Hardware identification as reported by `#C2-M:`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelInfo {
    pub main_model: u16,
    pub expansion_model: u16,
    pub firmware: String,
}

impl ModelInfo {
    pub fn is_signal_generator(&self) -> bool {
        self.main_model == MODEL_SIGNAL_GENERATOR
    }

    fn parse(fields: &str) -> Option<Self> {
        let mut fields = fields.split(',').map(str::trim);
        Some(Self {
            main_model: fields.next()?.parse().ok()?,
            expansion_model: fields.next()?.parse().ok()?,
            firmware: fields.next().unwrap_or_default().to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RfeMessage {
    ResetComplete,
    Config(AnalyzerConfig),
    Model(ModelInfo),
    /// Raw sample bytes of one sweep, amplitude is `-byte / 2` dBm.
    Sweep(Vec<u8>),
    Other(String),
}

impl RfeMessage {
    fn from_line(line: &str) -> Self {
        if let Some(fields) = line.strip_prefix(CONFIG_PREFIX) {
            match AnalyzerConfig::parse(fields) {
                Some(config) => return Self::Config(config),
                None => log::warn!("Malformed configuration message: {}", line),
            }
        } else if let Some(fields) = line.strip_prefix(MODEL_PREFIX) {
            match ModelInfo::parse(fields) {
                Some(model) => return Self::Model(model),
                None => log::warn!("Malformed model message: {}", line),
            }
        } else if line.contains(RESET_BANNER) {
            return Self::ResetComplete;
        }
        Self::Other(line.to_string())
    }
}

/// Turns the raw byte stream into [`RfeMessage`]s.
#[derive(Debug, Default)]
pub struct MessageFramer {
    buffer: Vec<u8>,
}

impl MessageFramer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Pop the next complete message, if one has fully arrived.
    pub fn next_message(&mut self) -> Option<RfeMessage> {
        let skip = self
            .buffer
            .iter()
            .take_while(|b| **b == b'\r' || **b == b'\n')
            .count();
        self.buffer.drain(..skip);

        if self.buffer.first() == Some(&b'$') {
            return self.next_sweep();
        }
        self.next_line()
    }

    fn next_line(&mut self) -> Option<RfeMessage> {
        match self.buffer.windows(2).position(|w| w == b"\r\n") {
            Some(end) => {
                let line: Vec<u8> = self.buffer.drain(..end + 2).take(end).collect();
                Some(RfeMessage::from_line(&String::from_utf8_lossy(&line)))
            }
            None => {
                if self.buffer.len() > MAX_PENDING_BYTES {
                    log::warn!("Discarding {} bytes without line ending", self.buffer.len());
                    self.buffer.clear();
                }
                None
            }
        }
    }

    fn next_sweep(&mut self) -> Option<RfeMessage> {
        let (header, samples) = match self.buffer.get(1)? {
            b'S' => (3, usize::from(*self.buffer.get(2)?)),
            b's' => (3, (usize::from(*self.buffer.get(2)?) + 1) * 16),
            b'z' => {
                let high = usize::from(*self.buffer.get(2)?);
                let low = usize::from(*self.buffer.get(3)?);
                (4, (high << 8) | low)
            }
            // Not a sweep frame, treat it as a line.
            _ => return self.next_line(),
        };

        if self.buffer.len() < header + samples {
            return None;
        }
        let data: Vec<u8> = self.buffer.drain(..header + samples).skip(header).collect();
        Some(RfeMessage::Sweep(data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG_LINE: &str =
        "#C2-F:0000050,0000089,-010,-120,0112,0,000,0000050,0200000,0000010,00003,0000,000";

    #[test]
    fn test_parse_config_line() {
        let mut framer = MessageFramer::new();
        framer.push(format!("{CONFIG_LINE}\r\n").as_bytes());
        match framer.next_message() {
            Some(RfeMessage::Config(config)) => {
                assert_eq!(config.start_khz, 50.0);
                assert_eq!(config.step_hz, 89.0);
                assert_eq!(config.amplitude_top_dbm, -10);
                assert_eq!(config.amplitude_bottom_dbm, -120);
                assert_eq!(config.sweep_points, 112);
                assert!(!config.expansion_active);
                assert_eq!(config.mode, MODE_SPECTRUM_ANALYZER);
                assert_eq!(config.min_frequency_khz, 50.0);
                assert_eq!(config.max_frequency_khz, 200_000.0);
                assert_eq!(config.max_span_khz, 10.0);
                assert_eq!(config.start_mhz(), 0.05);
            }
            other => unreachable!("unexpected message {other:?}"),
        }
        assert_eq!(framer.next_message(), None);
    }

    #[test]
    fn test_parse_model_and_banner() {
        let mut framer = MessageFramer::new();
        framer.push(b"RF Explorer (C) Ariel Rocholl 2010-2020\r\n#C2-M:006,255,01.33\r\n");
        assert_eq!(framer.next_message(), Some(RfeMessage::ResetComplete));
        assert_eq!(
            framer.next_message(),
            Some(RfeMessage::Model(ModelInfo {
                main_model: 6,
                expansion_model: 255,
                firmware: "01.33".to_string(),
            }))
        );
    }

    #[test]
    fn test_sweep_frame_may_contain_line_endings() {
        let mut framer = MessageFramer::new();
        framer.push(&[b'$', b'S', 4, 140, b'\r', b'\n', 150]);
        framer.push(b"\r\n#C2-M:060,255,01.10\r\n");
        assert_eq!(
            framer.next_message(),
            Some(RfeMessage::Sweep(vec![140, b'\r', b'\n', 150]))
        );
        match framer.next_message() {
            Some(RfeMessage::Model(model)) => assert!(model.is_signal_generator()),
            other => unreachable!("unexpected message {other:?}"),
        }
    }

    #[test]
    fn test_partial_frames_wait_for_more_data() {
        let mut framer = MessageFramer::new();
        framer.push(&[b'$', b'z', 0]);
        assert_eq!(framer.next_message(), None);
        framer.push(&[3, 100, 101]);
        assert_eq!(framer.next_message(), None);
        framer.push(&[102]);
        assert_eq!(framer.next_message(), Some(RfeMessage::Sweep(vec![100, 101, 102])));

        framer.push(b"#C2-F:0000050");
        assert_eq!(framer.next_message(), None);
        assert_eq!(framer.pending(), 13);
    }

    #[test]
    fn test_block_sweep_length() {
        let mut framer = MessageFramer::new();
        let mut frame = vec![b'$', b's', 1];
        frame.extend(std::iter::repeat(120).take(32));
        framer.push(&frame);
        match framer.next_message() {
            Some(RfeMessage::Sweep(data)) => assert_eq!(data.len(), 32),
            other => unreachable!("unexpected message {other:?}"),
        }
    }

    #[test]
    fn test_unterminated_dollar_line_is_discarded_when_too_long() {
        let mut framer = MessageFramer::new();
        framer.push(b"$X");
        framer.push(&vec![b'a'; MAX_PENDING_BYTES]);
        assert_eq!(framer.next_message(), None);
        assert_eq!(framer.pending(), 0);

        framer.push(b"$X hello\r\n");
        assert_eq!(framer.next_message(), Some(RfeMessage::Other("$X hello".to_string())));
    }

    #[test]
    fn test_malformed_config_is_kept_as_text() {
        let mut framer = MessageFramer::new();
        framer.push(b"#C2-F:garbage\r\n");
        assert_eq!(
            framer.next_message(),
            Some(RfeMessage::Other("#C2-F:garbage".to_string()))
        );
    }
}
