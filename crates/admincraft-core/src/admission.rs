//! Command admission: syntax validation and per-connection rate limiting.
//!
//! The gate is stateless apart from its configuration. Each session owns a
//! [`RateWindow`] and passes it in by mutable reference, so sessions never
//! contend on a shared lock.

use std::sync::LazyLock;
use std::time::{Duration, Instant};

use regex::Regex;

/// Default number of commands admitted per window.
pub const DEFAULT_RATE_BUDGET: u32 = 5;

/// Length of the rate window.
pub const RATE_WINDOW: Duration = Duration::from_secs(1);

/// Letters, digits, underscore, space and hyphen; nothing a shell or the
/// container exec wrapper would interpret.
static COMMAND_SYNTAX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_ -]+$").unwrap());

/// Per-session rate window state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateWindow {
    count: u32,
    started_at: Instant,
}

impl RateWindow {
    /// A fresh, empty window starting at `now`.
    pub fn new(now: Instant) -> Self {
        Self {
            count: 0,
            started_at: now,
        }
    }

    /// Commands admitted in the current window.
    pub fn count(&self) -> u32 {
        self.count
    }

    /// When the current window started.
    pub fn started_at(&self) -> Instant {
        self.started_at
    }
}

/// Why a command was not admitted. The display strings are what the client sees.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum AdmissionError {
    /// The command contains characters outside the allowed set.
    #[error("invalid input")]
    InvalidInput,
    /// The session already spent its budget for this window.
    #[error("rate limit exceeded")]
    RateLimited,
}

impl AdmissionError {
    /// Short classification string for logging/metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::InvalidInput => "invalid_input",
            Self::RateLimited => "rate_limited",
        }
    }
}

/// A command that passed both the syntax and the rate check.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AdmittedCommand(String);

impl AdmittedCommand {
    /// The validated command text.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume into the validated command text.
    pub fn into_inner(self) -> String {
        self.0
    }
}

/// Validates inbound commands and enforces a per-window budget.
#[derive(Clone, Copy, Debug)]
pub struct AdmissionGate {
    budget: u32,
    window: Duration,
}

impl AdmissionGate {
    /// Create a gate admitting at most `budget` commands per second.
    pub fn new(budget: u32) -> Self {
        Self {
            budget,
            window: RATE_WINDOW,
        }
    }

    /// The configured budget per window.
    pub fn budget(&self) -> u32 {
        self.budget
    }

    /// Run the syntax check, then the rate check against `window`.
    ///
    /// A rejected command never consumes budget.
    pub fn admit(
        &self,
        raw: &str,
        window: &mut RateWindow,
        now: Instant,
    ) -> Result<AdmittedCommand, AdmissionError> {
        if !is_valid_syntax(raw) {
            return Err(AdmissionError::InvalidInput);
        }

        if now.saturating_duration_since(window.started_at) > self.window {
            *window = RateWindow::new(now);
        }
        if window.count >= self.budget {
            return Err(AdmissionError::RateLimited);
        }
        window.count += 1;

        Ok(AdmittedCommand(raw.to_owned()))
    }
}

impl Default for AdmissionGate {
    fn default() -> Self {
        Self::new(DEFAULT_RATE_BUDGET)
    }
}

/// Whether `raw` consists solely of allowed command characters.
pub fn is_valid_syntax(raw: &str) -> bool {
    COMMAND_SYNTAX.is_match(raw)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    // ── syntax ──────────────────────────────────────────────────────

    #[test]
    fn plain_commands_are_valid() {
        assert!(is_valid_syntax("say hello"));
        assert!(is_valid_syntax("admincraft restart-server"));
        assert!(is_valid_syntax("give Steve_99 diamond 64"));
        assert!(is_valid_syntax("list"));
    }

    #[test]
    fn shell_metacharacters_are_invalid() {
        for raw in [
            "; rm -rf /",
            "say hi && reboot",
            "say $(whoami)",
            "say `id`",
            "say hi | nc host 1",
            "say hi > /tmp/x",
            "tp @a 0 0 0",
            "say \"quoted\"",
            "say hi\nstop",
            "say\thi",
            "weather clear.",
        ] {
            assert!(!is_valid_syntax(raw), "accepted {raw:?}");
        }
    }

    #[test]
    fn empty_and_non_ascii_are_invalid() {
        assert!(!is_valid_syntax(""));
        assert!(!is_valid_syntax("say héllo"));
        assert!(!is_valid_syntax("say hi\u{0}"));
    }

    // ── gate ────────────────────────────────────────────────────────

    #[test]
    fn admits_and_counts() {
        let gate = AdmissionGate::new(5);
        let now = Instant::now();
        let mut window = RateWindow::new(now);

        let cmd = gate.admit("say hello", &mut window, now).unwrap();
        assert_eq!(cmd.as_str(), "say hello");
        assert_eq!(window.count(), 1);
        assert_eq!(cmd.into_inner(), "say hello");
    }

    #[test]
    fn invalid_input_rejected_regardless_of_window() {
        let gate = AdmissionGate::new(5);
        let now = Instant::now();

        let mut fresh = RateWindow::new(now);
        assert_eq!(
            gate.admit("; rm -rf /", &mut fresh, now),
            Err(AdmissionError::InvalidInput)
        );
        assert_eq!(fresh.count(), 0);

        let mut exhausted = RateWindow::new(now);
        for _ in 0..5 {
            let _ = gate.admit("list", &mut exhausted, now).unwrap();
        }
        assert_eq!(
            gate.admit("; rm -rf /", &mut exhausted, now),
            Err(AdmissionError::InvalidInput)
        );
    }

    #[test]
    fn budget_enforced_within_window() {
        let gate = AdmissionGate::new(5);
        let start = Instant::now();
        let mut window = RateWindow::new(start);

        let results: Vec<_> = (0..8u64)
            .map(|i| gate.admit("list", &mut window, start + Duration::from_millis(i * 10)))
            .collect();

        let admitted = results.iter().filter(|r| r.is_ok()).count();
        let limited = results
            .iter()
            .filter(|r| **r == Err(AdmissionError::RateLimited))
            .count();
        assert_eq!(admitted, 5);
        assert_eq!(limited, 3);
        assert_eq!(window.count(), 5);
    }

    #[test]
    fn admission_resumes_after_window() {
        let gate = AdmissionGate::new(2);
        let start = Instant::now();
        let mut window = RateWindow::new(start);

        assert!(gate.admit("list", &mut window, start).is_ok());
        assert!(gate.admit("list", &mut window, start).is_ok());
        assert_eq!(
            gate.admit("list", &mut window, start),
            Err(AdmissionError::RateLimited)
        );

        let later = start + Duration::from_millis(1001);
        assert!(gate.admit("list", &mut window, later).is_ok());
        assert_eq!(window.count(), 1);
        assert_eq!(window.started_at(), later);
    }

    #[test]
    fn window_not_reset_at_exactly_one_second() {
        let gate = AdmissionGate::new(1);
        let start = Instant::now();
        let mut window = RateWindow::new(start);

        assert!(gate.admit("list", &mut window, start).is_ok());
        assert_eq!(
            gate.admit("list", &mut window, start + RATE_WINDOW),
            Err(AdmissionError::RateLimited)
        );
    }

    #[test]
    fn zero_budget_limits_everything() {
        let gate = AdmissionGate::new(0);
        let now = Instant::now();
        let mut window = RateWindow::new(now);
        assert_eq!(gate.admit("list", &mut window, now), Err(AdmissionError::RateLimited));
    }

    #[test]
    fn default_gate_budget() {
        assert_eq!(AdmissionGate::default().budget(), DEFAULT_RATE_BUDGET);
    }

    #[test]
    fn rejection_display_strings() {
        assert_eq!(AdmissionError::InvalidInput.to_string(), "invalid input");
        assert_eq!(AdmissionError::RateLimited.to_string(), "rate limit exceeded");
        assert_eq!(AdmissionError::RateLimited.error_kind(), "rate_limited");
    }
}
