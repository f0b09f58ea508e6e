use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::path::{Path, PathBuf};

#[zbus::proxy(
    interface = "org.freedesktop.Attendance1",
    default_service = "org.freedesktop.Attendance1",
    default_path = "/org/freedesktop/Attendance1"
)]
trait Attendance {
    async fn create_identity(&self, name: &str) -> zbus::Result<i64>;
    async fn enroll_image(&self, identity_id: i64, image: &[u8]) -> zbus::Result<String>;
    async fn train(&self) -> zbus::Result<String>;
    async fn mark_attendance(&self, image: &[u8]) -> zbus::Result<String>;
    async fn is_marked_today(&self, identity_id: i64) -> zbus::Result<bool>;
    async fn record_attendance(&self, identity_id: i64, date: &str, time: &str) -> zbus::Result<String>;
    async fn list_attendance(&self) -> zbus::Result<String>;
    async fn list_identities(&self) -> zbus::Result<String>;
    async fn delete_identity(&self, identity_id: i64) -> zbus::Result<String>;
    async fn delete_training_image(&self, image_id: i64) -> zbus::Result<bool>;
    async fn status(&self) -> zbus::Result<String>;
}

#[derive(Parser)]
#[command(name = "attendance", about = "Face-recognition attendance CLI")]
struct Cli {
    /// Talk to the daemon on the system bus instead of the session bus
    #[arg(long, global = true)]
    system: bool,

    /// Print raw JSON replies
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a new person
    AddPerson {
        /// Display name
        name: String,
    },
    /// Add training images for a person
    Enroll {
        /// Identity id returned by add-person
        #[arg(short, long)]
        id: i64,
        /// Image files, one face each
        #[arg(required = true)]
        images: Vec<PathBuf>,
    },
    /// Rebuild the recognition model from all training images
    Train,
    /// Mark attendance from a captured image
    Mark {
        image: PathBuf,
    },
    /// Record attendance by hand for a person
    Record {
        id: i64,
        /// YYYY-MM-DD
        date: String,
        /// HH:MM:SS
        time: String,
    },
    /// Check whether a person is marked for today
    Marked {
        id: i64,
    },
    /// List attendance records, newest first
    List,
    /// List registered people
    People,
    /// Remove a person with their attendance and training images
    RemovePerson {
        id: i64,
    },
    /// Remove a single training image
    RemoveImage {
        id: i64,
    },
    /// Show daemon status
    Status,
}

fn read_image(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))
}

fn parse(reply: &str) -> Result<Value> {
    serde_json::from_str(reply).context("daemon returned malformed JSON")
}

fn code(value: &Value) -> &str {
    value.get("code").and_then(Value::as_str).unwrap_or("UNKNOWN")
}

fn print_mark(value: &Value) {
    let score = value.get("score").and_then(Value::as_f64);
    let name = value
        .pointer("/identity/display_name")
        .and_then(Value::as_str)
        .unwrap_or("?");
    match code(value) {
        "MARKED" => {
            let time = value.pointer("/event/time").and_then(Value::as_str).unwrap_or("?");
            println!("MARKED: {name} at {time}");
        }
        "ALREADY_MARKED" => println!("ALREADY_MARKED: {name} was already marked today"),
        "NOT_RECOGNIZED" => println!("NOT_RECOGNIZED: no match (score {:.2})", score.unwrap_or(f64::NAN)),
        "UNKNOWN_IDENTITY" => println!("UNKNOWN_IDENTITY: model predicted a deleted person; retrain"),
        "MODEL_UNTRAINED" => println!("MODEL_UNTRAINED: run `attendance train` first"),
        "NO_FACE" => println!("NO_FACE: no face found in the image"),
        other => println!("{other}"),
    }
}

fn print_records(value: &Value) {
    let Some(records) = value.as_array() else {
        return;
    };
    if records.is_empty() {
        println!("No attendance recorded");
        return;
    }
    println!("{:<8} {:<24} {:<12} {:<10}", "ID", "NAME", "DATE", "TIME");
    for r in records {
        println!(
            "{:<8} {:<24} {:<12} {:<10}",
            r["identity_id"],
            r["display_name"].as_str().unwrap_or(""),
            r["date"].as_str().unwrap_or(""),
            r["time"].as_str().unwrap_or(""),
        );
    }
}

fn print_people(value: &Value) {
    let Some(people) = value.as_array() else {
        return;
    };
    if people.is_empty() {
        println!("No people registered");
        return;
    }
    println!("{:<8} {:<24} {:<8}", "ID", "NAME", "IMAGES");
    for p in people {
        println!(
            "{:<8} {:<24} {:<8}",
            p["id"],
            p["display_name"].as_str().unwrap_or(""),
            p["training_images"],
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let system = cli.system || std::env::var("ATTEND_BUS").is_ok_and(|v| v == "system");
    let connection = if system {
        zbus::Connection::system().await
    } else {
        zbus::Connection::session().await
    }
    .context("failed to connect to D-Bus")?;
    let proxy = AttendanceProxy::new(&connection)
        .await
        .context("attendanced is not reachable")?;

    match cli.command {
        Commands::AddPerson { name } => {
            let id = proxy.create_identity(&name).await?;
            println!("Registered {name} with id {id}");
        }
        Commands::Enroll { id, images } => {
            let mut stored = 0usize;
            for path in &images {
                let bytes = read_image(path)?;
                tracing::debug!(path = %path.display(), bytes = bytes.len(), "sending image");
                let reply = proxy.enroll_image(id, &bytes).await?;
                let value = parse(&reply)?;
                if cli.json {
                    println!("{reply}");
                    continue;
                }
                match code(&value) {
                    "STORED" => {
                        stored += 1;
                        println!("{}: stored as image {}", path.display(), value["image_id"]);
                    }
                    "UNKNOWN_IDENTITY" => bail!("no person with id {id}"),
                    other => println!("{}: {other}", path.display()),
                }
            }
            if !cli.json {
                println!("{stored}/{} images stored; run `attendance train` to update the model", images.len());
            }
        }
        Commands::Train => {
            let reply = proxy.train().await?;
            let value = parse(&reply)?;
            if cli.json {
                println!("{reply}");
            } else if code(&value) == "TRAINED" {
                println!(
                    "Model trained on {} images of {} people (corpus version {})",
                    value["samples"], value["identities"], value["corpus_version"]
                );
            } else {
                println!("{}: no training images stored", code(&value));
            }
        }
        Commands::Mark { image } => {
            let reply = proxy.mark_attendance(&read_image(&image)?).await?;
            if cli.json {
                println!("{reply}");
            } else {
                print_mark(&parse(&reply)?);
            }
        }
        Commands::Record { id, date, time } => {
            let reply = proxy.record_attendance(id, &date, &time).await?;
            let value = parse(&reply)?;
            if cli.json {
                println!("{reply}");
            } else if code(&value) == "MARKED" {
                println!("Recorded attendance for {id} on {date} at {time}");
            } else {
                println!("{}: {id} already has attendance on {date}", code(&value));
            }
        }
        Commands::Marked { id } => {
            if proxy.is_marked_today(id).await? {
                println!("{id} is marked for today");
            } else {
                println!("{id} is not marked for today");
            }
        }
        Commands::List => {
            let reply = proxy.list_attendance().await?;
            if cli.json {
                println!("{reply}");
            } else {
                print_records(&parse(&reply)?);
            }
        }
        Commands::People => {
            let reply = proxy.list_identities().await?;
            if cli.json {
                println!("{reply}");
            } else {
                print_people(&parse(&reply)?);
            }
        }
        Commands::RemovePerson { id } => {
            let reply = proxy.delete_identity(id).await?;
            let value = parse(&reply)?;
            if cli.json {
                println!("{reply}");
            } else if value.is_null() {
                println!("No person with id {id}");
            } else {
                println!(
                    "Removed {} ({} attendance records, {} training images)",
                    value.pointer("/identity/display_name").and_then(Value::as_str).unwrap_or("?"),
                    value["events_removed"],
                    value["images_removed"],
                );
                let outcome = value.pointer("/retrain/outcome/code").and_then(Value::as_str);
                match value.pointer("/retrain/status").and_then(Value::as_str) {
                    Some("done") if outcome == Some("TRAINED") => println!("Model retrained"),
                    Some("done") => println!("No training images left; previous model kept"),
                    Some("failed") => println!("Retrain failed: {}", value["retrain"]["error"]),
                    _ => println!("Model is stale; run `attendance train`"),
                }
            }
        }
        Commands::RemoveImage { id } => {
            if proxy.delete_training_image(id).await? {
                println!("Removed training image {id}; run `attendance train` to update the model");
            } else {
                println!("No training image with id {id}");
            }
        }
        Commands::Status => {
            let reply = proxy.status().await?;
            println!("{}", serde_json::to_string_pretty(&parse(&reply)?)?);
        }
    }

    Ok(())
}
