use rollcall_core::recognizer::DEFAULT_MATCH_RATE;
use rollcall_core::{
    HttpRecognizer, ManualPolicy, RecognitionClient, Roster, RosterError, RosterStore,
    SimulatedRecognizer,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Which recognition client the daemon talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecognizerKind {
    /// The HTTP recognition service.
    Http,
    /// In-process random classifier.
    Simulated,
}

/// Daemon configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Roster TOML file. The built-in demo roster is used when unset.
    pub roster_path: Option<PathBuf>,
    pub recognizer: RecognizerKind,
    /// Recognition service endpoint (default: http://localhost:5000/recognize).
    pub recognizer_url: String,
    /// Timeout in seconds for a single recognition call.
    pub recognition_timeout_secs: u64,
    /// Match probability for the simulated recognizer.
    pub match_rate: f64,
    /// RNG seed for the simulated recognizer; random when unset.
    pub sim_seed: Option<u64>,
    pub manual_policy: ManualPolicy,
    /// SQLite attendance log. Attendance is kept in memory only when unset.
    pub db_path: Option<PathBuf>,
    /// Serve on the system bus instead of the session bus.
    pub system_bus: bool,
}

impl Config {
    /// Load configuration from `ROLLCALL_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let recognizer = match var("ROLLCALL_RECOGNIZER").as_deref().map(str::trim) {
            Some("http") => RecognizerKind::Http,
            Some("simulated") | None => RecognizerKind::Simulated,
            Some(other) => {
                tracing::warn!(value = other, "unknown ROLLCALL_RECOGNIZER; using simulated");
                RecognizerKind::Simulated
            }
        };

        let manual_policy = match var("ROLLCALL_MANUAL_POLICY") {
            Some(v) => v.parse().unwrap_or_else(|err| {
                tracing::warn!(error = %err, "falling back to open manual check-in");
                ManualPolicy::OpenWorld
            }),
            None => ManualPolicy::OpenWorld,
        };

        Self {
            roster_path: var("ROLLCALL_ROSTER_PATH").map(PathBuf::from),
            recognizer,
            recognizer_url: var("ROLLCALL_RECOGNIZER_URL")
                .unwrap_or_else(|| "http://localhost:5000/recognize".to_string()),
            recognition_timeout_secs: parse_or(&var, "ROLLCALL_RECOGNITION_TIMEOUT_SECS", 10),
            match_rate: parse_or(&var, "ROLLCALL_MATCH_RATE", DEFAULT_MATCH_RATE),
            sim_seed: var("ROLLCALL_SIM_SEED").and_then(|v| v.parse().ok()),
            manual_policy,
            db_path: var("ROLLCALL_DB_PATH").map(PathBuf::from),
            system_bus: var("ROLLCALL_SYSTEM_BUS")
                .map(|v| v != "0")
                .unwrap_or(false),
        }
    }

    pub fn recognition_timeout(&self) -> Duration {
        Duration::from_secs(self.recognition_timeout_secs)
    }

    pub fn load_roster(&self) -> Result<Roster, RosterError> {
        match &self.roster_path {
            Some(path) => Roster::load(path),
            None => {
                tracing::info!("no ROLLCALL_ROSTER_PATH; using demo roster");
                Ok(Roster::demo())
            }
        }
    }

    pub fn build_recognizer(&self, roster: Arc<dyn RosterStore>) -> Arc<dyn RecognitionClient> {
        match self.recognizer {
            RecognizerKind::Http => Arc::new(HttpRecognizer::new(
                self.recognizer_url.clone(),
                self.recognition_timeout(),
                roster,
            )),
            RecognizerKind::Simulated => {
                Arc::new(SimulatedRecognizer::new(roster, self.match_rate, self.sim_seed))
            }
        }
    }
}

fn parse_or<T: std::str::FromStr>(var: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    var(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(pairs: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let cfg = config(&[]);
        assert_eq!(cfg.recognizer, RecognizerKind::Simulated);
        assert_eq!(cfg.recognizer_url, "http://localhost:5000/recognize");
        assert_eq!(cfg.recognition_timeout(), Duration::from_secs(10));
        assert_eq!(cfg.manual_policy, ManualPolicy::OpenWorld);
        assert!(cfg.db_path.is_none());
        assert!(cfg.roster_path.is_none());
        assert!(!cfg.system_bus);
        assert!((cfg.match_rate - 0.7).abs() < f64::EPSILON);
    }

    #[test]
    fn test_overrides() {
        let cfg = config(&[
            ("ROLLCALL_RECOGNIZER", "http"),
            ("ROLLCALL_RECOGNITION_TIMEOUT_SECS", "3"),
            ("ROLLCALL_MANUAL_POLICY", "roster"),
            ("ROLLCALL_DB_PATH", "/var/lib/rollcall/attendance.db"),
            ("ROLLCALL_SIM_SEED", "17"),
            ("ROLLCALL_SYSTEM_BUS", "1"),
        ]);
        assert_eq!(cfg.recognizer, RecognizerKind::Http);
        assert_eq!(cfg.recognition_timeout_secs, 3);
        assert_eq!(cfg.manual_policy, ManualPolicy::RosterOnly);
        assert_eq!(cfg.db_path, Some(PathBuf::from("/var/lib/rollcall/attendance.db")));
        assert_eq!(cfg.sim_seed, Some(17));
        assert!(cfg.system_bus);
    }

    #[test]
    fn test_bad_values_fall_back() {
        let cfg = config(&[
            ("ROLLCALL_RECOGNIZER", "onnx"),
            ("ROLLCALL_RECOGNITION_TIMEOUT_SECS", "soon"),
            ("ROLLCALL_MANUAL_POLICY", "strict"),
        ]);
        assert_eq!(cfg.recognizer, RecognizerKind::Simulated);
        assert_eq!(cfg.recognition_timeout_secs, 10);
        assert_eq!(cfg.manual_policy, ManualPolicy::OpenWorld);
    }

    #[test]
    fn test_demo_roster_without_path() {
        let roster = config(&[]).load_roster().unwrap();
        assert_eq!(roster.len(), 3);
    }

    #[test]
    fn test_build_recognizer_kind() {
        let roster: Arc<dyn RosterStore> = Arc::new(Roster::demo());
        let sim = config(&[]).build_recognizer(roster.clone());
        assert_eq!(sim.name(), "simulated");
        let http = config(&[("ROLLCALL_RECOGNIZER", "http")]).build_recognizer(roster);
        assert_eq!(http.name(), "http");
    }
}
