//! Recognition clients.
//!
//! A client turns one captured image into exactly one [`RecognitionOutcome`].
//! Calls block; callers run them off the thread that owns the ledger.

use crate::roster::RosterStore;
use crate::types::{CapturedImage, RecognitionOutcome};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::Deserialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Reply label the recognition service uses for a face it does not know.
const UNKNOWN_LABEL: &str = "Unknown";
/// Reply label the recognition service uses when it found no face at all.
const NO_FACE_LABEL: &str = "No face detected";
/// Chance that the simulated classifier reports a roster match.
pub const DEFAULT_MATCH_RATE: f64 = 0.7;

/// Contract for anything that can classify a captured image.
pub trait RecognitionClient: Send + Sync {
    /// Short name for logs and status reports.
    fn name(&self) -> &'static str;

    fn recognize(&self, image: &CapturedImage) -> RecognitionOutcome;
}

#[derive(Debug, Deserialize)]
struct RecognizeReply {
    result: String,
}

/// Client for the HTTP recognition service.
///
/// Sends `{"image": "<data URL>"}` and expects `{"result": "<name>"}` back.
pub struct HttpRecognizer {
    agent: ureq::Agent,
    endpoint: String,
    roster: Arc<dyn RosterStore>,
}

impl HttpRecognizer {
    pub fn new(endpoint: impl Into<String>, timeout: Duration, roster: Arc<dyn RosterStore>) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Self {
            agent,
            endpoint: endpoint.into(),
            roster,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Map the service's reply label onto an outcome.
    ///
    /// The service answers with display names; a name that is not on our
    /// roster is somebody we cannot check in, so it counts as unmatched.
    fn interpret(&self, result: &str) -> RecognitionOutcome {
        let result = result.trim();
        if result.eq_ignore_ascii_case(UNKNOWN_LABEL) {
            return RecognitionOutcome::Unmatched;
        }
        if result.eq_ignore_ascii_case(NO_FACE_LABEL) {
            return RecognitionOutcome::Failed {
                reason: "no face detected".to_string(),
            };
        }
        if result.is_empty() {
            return RecognitionOutcome::Failed {
                reason: "malformed response: empty result".to_string(),
            };
        }
        match self.roster.find_by_name(result) {
            Some(person) => RecognitionOutcome::Matched {
                person_id: person.id,
                display_name: person.display_name,
            },
            None => {
                tracing::warn!(name = result, "service matched a name that is not on the roster");
                RecognitionOutcome::Unmatched
            }
        }
    }
}

impl RecognitionClient for HttpRecognizer {
    fn name(&self) -> &'static str {
        "http"
    }

    fn recognize(&self, image: &CapturedImage) -> RecognitionOutcome {
        let body = serde_json::json!({ "image": image.to_data_url() });
        tracing::debug!(endpoint = %self.endpoint, bytes = image.bytes.len(), "sending recognition request");

        let response = match self.agent.post(&self.endpoint).send_json(body) {
            Ok(resp) => resp,
            Err(ureq::Error::Status(code, _)) => {
                return RecognitionOutcome::Failed {
                    reason: format!("service returned HTTP {code}"),
                };
            }
            Err(err) => {
                return RecognitionOutcome::Failed {
                    reason: format!("service unreachable: {err}"),
                };
            }
        };

        match response.into_json::<RecognizeReply>() {
            Ok(reply) => self.interpret(&reply.result),
            Err(err) => RecognitionOutcome::Failed {
                reason: format!("malformed response: {err}"),
            },
        }
    }
}

/// Stand-in classifier for demos and tests.
///
/// Reports a random roster member with probability `match_rate`, otherwise
/// an unmatched face. Seed it for reproducible runs.
pub struct SimulatedRecognizer {
    roster: Arc<dyn RosterStore>,
    match_rate: f64,
    rng: Mutex<StdRng>,
}

impl SimulatedRecognizer {
    pub fn new(roster: Arc<dyn RosterStore>, match_rate: f64, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let match_rate = if match_rate.is_finite() {
            match_rate.clamp(0.0, 1.0)
        } else {
            DEFAULT_MATCH_RATE
        };
        Self {
            roster,
            match_rate,
            rng: Mutex::new(rng),
        }
    }
}

impl RecognitionClient for SimulatedRecognizer {
    fn name(&self) -> &'static str {
        "simulated"
    }

    fn recognize(&self, _image: &CapturedImage) -> RecognitionOutcome {
        let people = self.roster.list_people();
        let mut rng = match self.rng.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if !rng.gen_bool(self.match_rate) {
            return RecognitionOutcome::Unmatched;
        }
        match people.choose(&mut *rng) {
            Some(person) => RecognitionOutcome::Matched {
                person_id: person.id,
                display_name: person.display_name.clone(),
            },
            None => RecognitionOutcome::Unmatched,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::roster::Roster;
    use crate::types::PersonId;

    fn blank_image() -> CapturedImage {
        CapturedImage::jpeg(vec![0xff, 0xd8, 0xff, 0xd9])
    }

    fn http() -> HttpRecognizer {
        HttpRecognizer::new(
            "http://127.0.0.1:9/recognize",
            Duration::from_millis(200),
            Arc::new(Roster::demo()),
        )
    }

    #[test]
    fn test_interpret_known_name() {
        assert_eq!(
            http().interpret("Bob"),
            RecognitionOutcome::Matched {
                person_id: PersonId(2),
                display_name: "Bob".into()
            }
        );
    }

    #[test]
    fn test_interpret_unknown() {
        assert_eq!(http().interpret("Unknown"), RecognitionOutcome::Unmatched);
    }

    #[test]
    fn test_interpret_no_face_is_failure_not_stranger() {
        assert!(matches!(
            http().interpret("No face detected"),
            RecognitionOutcome::Failed { .. }
        ));
    }

    #[test]
    fn test_interpret_name_off_roster() {
        assert_eq!(http().interpret("Mallory"), RecognitionOutcome::Unmatched);
    }

    #[test]
    fn test_unreachable_service_fails() {
        // Port 9 (discard) is closed on test machines; connection is refused.
        let outcome = http().recognize(&blank_image());
        assert!(matches!(outcome, RecognitionOutcome::Failed { .. }));
    }

    #[test]
    fn test_simulated_always_matches_at_rate_one() {
        let sim = SimulatedRecognizer::new(Arc::new(Roster::demo()), 1.0, Some(42));
        for _ in 0..20 {
            match sim.recognize(&blank_image()) {
                RecognitionOutcome::Matched { person_id, .. } => {
                    assert!((1..=3).contains(&person_id.0));
                }
                other => panic!("expected match, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_simulated_never_matches_at_rate_zero() {
        let sim = SimulatedRecognizer::new(Arc::new(Roster::demo()), 0.0, Some(7));
        for _ in 0..20 {
            assert_eq!(sim.recognize(&blank_image()), RecognitionOutcome::Unmatched);
        }
    }

    #[test]
    fn test_simulated_empty_roster_is_unmatched() {
        let sim = SimulatedRecognizer::new(Arc::new(Roster::empty()), 1.0, Some(1));
        assert_eq!(sim.recognize(&blank_image()), RecognitionOutcome::Unmatched);
    }

    #[test]
    fn test_simulated_seed_is_reproducible() {
        let roster: Arc<dyn RosterStore> = Arc::new(Roster::demo());
        let a = SimulatedRecognizer::new(roster.clone(), DEFAULT_MATCH_RATE, Some(99));
        let b = SimulatedRecognizer::new(roster, DEFAULT_MATCH_RATE, Some(99));
        let image = blank_image();
        let run_a: Vec<_> = (0..10).map(|_| a.recognize(&image)).collect();
        let run_b: Vec<_> = (0..10).map(|_| b.recognize(&image)).collect();
        assert_eq!(run_a, run_b);
    }
}
