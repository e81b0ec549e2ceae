use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rollcall_core::{Person, SessionSnapshot};
use std::path::PathBuf;

// `#[zbus::proxy]` generates `AttendanceProxy` (async) and a blocking twin.
#[zbus::proxy(
    interface = "org.rollcall.Attendance1",
    default_service = "org.rollcall.Attendance1",
    default_path = "/org/rollcall/Attendance1"
)]
trait Attendance {
    async fn recognize(&self, image_path: &str) -> zbus::Result<String>;
    async fn recognize_data(&self, data: &[u8]) -> zbus::Result<String>;
    async fn check_in(&self, text: &str) -> zbus::Result<String>;
    async fn resolve_sighting(&self, id: u64, name: &str) -> zbus::Result<String>;
    async fn check_in_person(&self, id: u32) -> zbus::Result<String>;
    async fn reset(&self) -> zbus::Result<String>;
    async fn snapshot(&self) -> zbus::Result<String>;
    async fn roster(&self) -> zbus::Result<String>;
    async fn status(&self) -> zbus::Result<String>;
}

#[derive(Parser)]
#[command(name = "rollcall", about = "Rollcall attendance CLI")]
struct Cli {
    /// Print raw JSON replies instead of formatted text
    #[arg(long, global = true)]
    json: bool,
    /// Talk to a daemon on the system bus
    #[arg(long, global = true)]
    system: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Recognize the person in an image and update attendance
    Recognize {
        /// Image file (JPEG, PNG, ...)
        image: PathBuf,
        /// Send the image bytes instead of the path (daemon cannot read the file)
        #[arg(long)]
        inline: bool,
    },
    /// Manually check someone in by name, roster id or stranger label
    CheckIn {
        /// e.g. "Stranger 2", "Alice", "7"
        #[arg(required = true, num_args = 1..)]
        name: Vec<String>,
    },
    /// Resolve a stranger by sighting id, optionally naming who it was
    Resolve {
        /// Sighting id (the N in "Stranger N")
        id: u64,
        /// Check the stranger in as this person
        #[arg(long = "as")]
        name: Option<String>,
    },
    /// Check in a roster member by id
    CheckInPerson {
        id: u32,
    },
    /// List checked-in people
    List,
    /// List unresolved strangers
    Strangers,
    /// Show the roster
    Roster,
    /// Show daemon status
    Status,
    /// Clear the session and start a new one
    Reset,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let conn = if cli.system {
        zbus::Connection::system().await
    } else {
        zbus::Connection::session().await
    }
    .context("connecting to D-Bus")?;
    let proxy = AttendanceProxy::new(&conn)
        .await
        .context("rollcalld is not reachable")?;
    tracing::debug!(system_bus = cli.system, "connected to rollcalld");

    let view = match cli.command {
        Commands::Recognize { image, inline } => {
            let reply = if inline {
                let data = std::fs::read(&image)
                    .with_context(|| format!("reading {}", image.display()))?;
                tracing::debug!(path = %image.display(), bytes = data.len(), "sending image inline");
                proxy.recognize_data(&data).await?
            } else {
                // The daemon resolves paths against its own working directory.
                let path = std::fs::canonicalize(&image).unwrap_or(image);
                proxy.recognize(&path.to_string_lossy()).await?
            };
            Some((reply, View::Full))
        }
        Commands::CheckIn { name } => Some((proxy.check_in(&name.join(" ")).await?, View::Full)),
        Commands::Resolve { id, name } => Some((
            proxy
                .resolve_sighting(id, name.as_deref().unwrap_or(""))
                .await?,
            View::Full,
        )),
        Commands::CheckInPerson { id } => Some((proxy.check_in_person(id).await?, View::Full)),
        Commands::List => Some((proxy.snapshot().await?, View::CheckedIn)),
        Commands::Strangers => Some((proxy.snapshot().await?, View::Strangers)),
        Commands::Reset => Some((proxy.reset().await?, View::Full)),
        Commands::Roster => {
            let reply = proxy.roster().await?;
            if cli.json {
                println!("{reply}");
            } else {
                let people: Vec<Person> =
                    serde_json::from_str(&reply).context("decoding roster")?;
                print_roster(&people);
            }
            None
        }
        Commands::Status => {
            println!("{}", proxy.status().await?);
            None
        }
    };

    if let Some((reply, view)) = view {
        if cli.json {
            println!("{reply}");
        } else {
            let snapshot: SessionSnapshot =
                serde_json::from_str(&reply).context("decoding session snapshot")?;
            print!("{}", render(&snapshot, view));
        }
    }

    Ok(())
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum View {
    Full,
    CheckedIn,
    Strangers,
}

fn render(snapshot: &SessionSnapshot, view: View) -> String {
    let mut out = String::new();
    if view != View::Strangers {
        out.push_str(&format!("Checked in ({}):\n", snapshot.checked_in.len()));
        for record in &snapshot.checked_in {
            out.push_str(&format!(
                "  \u{2713} {:<24} {:<10} #{}\n",
                record.display_name,
                record.source.as_str(),
                record.checked_in_at
            ));
        }
    }
    if view != View::CheckedIn {
        out.push_str(&format!("Strangers ({}):\n", snapshot.unresolved.len()));
        for sighting in &snapshot.unresolved {
            out.push_str(&format!("  ? [{}] {}\n", sighting.id, sighting.label));
        }
    }
    if view == View::Full && !snapshot.status.text.is_empty() {
        let prefix = if snapshot.status.is_error() { "!" } else { ">" };
        out.push_str(&format!("{prefix} {}\n", snapshot.status.text));
    }
    out
}

fn print_roster(people: &[Person]) {
    if people.is_empty() {
        println!("Roster is empty");
        return;
    }
    for person in people {
        let mut line = format!("{:>5}  {}", person.id, person.display_name);
        if let Some(group) = &person.group {
            line.push_str(&format!("  [{group}]"));
        }
        if let Some(roll) = &person.roll_number {
            line.push_str(&format!("  roll {roll}"));
        }
        if let Some(age) = person.age {
            line.push_str(&format!("  age {age}"));
        }
        println!("{line}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollcall_core::{
        AttendanceRecord, AttendeeId, CheckInSource, PersonId, SightingId, StatusKind,
        StatusMessage, UnresolvedSighting,
    };

    fn snapshot() -> SessionSnapshot {
        SessionSnapshot {
            checked_in: vec![AttendanceRecord {
                attendee: AttendeeId::Roster(PersonId(1)),
                display_name: "Alice".into(),
                checked_in_at: 1,
                source: CheckInSource::Recognized,
            }],
            unresolved: vec![UnresolvedSighting::new(SightingId(2), 3)],
            status: StatusMessage::new(StatusKind::Unresolved, "Unrecognized person detected (Stranger 2)"),
        }
    }

    #[test]
    fn test_render_full() {
        let text = render(&snapshot(), View::Full);
        assert!(text.contains("Checked in (1):"));
        assert!(text.contains("Alice"));
        assert!(text.contains("recognized"));
        assert!(text.contains("? [2] Stranger 2"));
        assert!(text.ends_with("> Unrecognized person detected (Stranger 2)\n"));
    }

    #[test]
    fn test_render_partial_views() {
        let checked_in = render(&snapshot(), View::CheckedIn);
        assert!(checked_in.contains("Alice"));
        assert!(!checked_in.contains("Strangers"));

        let strangers = render(&snapshot(), View::Strangers);
        assert!(strangers.contains("Stranger 2"));
        assert!(!strangers.contains("Alice"));
    }

    #[test]
    fn test_render_error_status() {
        let mut snap = snapshot();
        snap.status = StatusMessage::new(StatusKind::Error, "Recognition failed: timeout");
        assert!(render(&snap, View::Full).contains("! Recognition failed: timeout"));
    }

    #[test]
    fn test_snapshot_json_from_daemon_parses() {
        let json = serde_json::to_string(&snapshot()).unwrap();
        let parsed: SessionSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, snapshot());
    }

    #[test]
    fn test_cli_parses_multiword_name() {
        let cli = Cli::try_parse_from(["rollcall", "check-in", "Dana", "Scully"]).unwrap();
        match cli.command {
            Commands::CheckIn { name } => assert_eq!(name.join(" "), "Dana Scully"),
            _ => panic!("expected check-in"),
        }
    }

    #[test]
    fn test_cli_parses_resolve_as() {
        let cli = Cli::try_parse_from(["rollcall", "--json", "resolve", "3", "--as", "Bob"]).unwrap();
        assert!(cli.json);
        match cli.command {
            Commands::Resolve { id, name } => {
                assert_eq!(id, 3);
                assert_eq!(name.as_deref(), Some("Bob"));
            }
            _ => panic!("expected resolve"),
        }
    }
}
