//! healthmate-cli: talk to the Healthmate server from a terminal
//!
//! # Subcommands
//! - `greeting` show the dashboard greeting
//! - `start` open (or reuse) a chat session
//! - `chat [message]` send one message, or chat interactively until `/end`
//! - `end [--out <dir>]` end the session and save the prescription PDF
//! - `status` show server health

use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use serde::Deserialize;

const DEFAULT_SERVER: &str = "http://127.0.0.1:8780";
const DEFAULT_USER_HEADER: &str = "x-healthmate-user";
const END_COMMAND: &str = "/end";

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Debug, Parser)]
#[command(name = "healthmate-cli", version, about = "Chat with the Healthmate assistant")]
struct Cli {
    /// Healthmate HTTP server URL
    #[arg(long, env = "HEALTHMATE_HTTP_URL", default_value = DEFAULT_SERVER)]
    server: String,

    /// Username sent as the caller identity (not needed for `status`)
    #[arg(short, long, env = "HEALTHMATE_USER")]
    user: Option<String>,

    /// Header the server reads the identity from
    #[arg(long, env = "HEALTHMATE_USER_HEADER", default_value = DEFAULT_USER_HEADER)]
    user_header: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Show the greeting for the current user
    Greeting,

    /// Open a chat session
    Start,

    /// Send a message; without one, read messages from stdin until `/end`
    Chat { message: Option<String> },

    /// End the session and download the prescription
    End {
        /// Directory the PDF is written to
        #[arg(long, default_value = ".")]
        out: PathBuf,
    },

    /// Show Healthmate server status
    Status,
}

// ============================================================================
// API Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ChatResponse {
    pub response: String,
    pub initial_response: String,
}

#[derive(Debug, Deserialize)]
pub struct StartResponse {
    pub session_id: String,
    pub created: bool,
}

// ============================================================================
// Helpers
// ============================================================================

/// Filename from `attachment; filename="..."`, reduced to its last path
/// component.
pub fn attachment_filename(disposition: &str) -> Option<String> {
    let raw = disposition
        .split(';')
        .map(str::trim)
        .find_map(|part| part.strip_prefix("filename="))?
        .trim_matches('"');
    let name = Path::new(raw).file_name()?.to_str()?.to_string();
    if name.is_empty() {
        None
    } else {
        Some(name)
    }
}

/// The server's `{status:"error", message}` text, or the raw body.
pub fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v["message"].as_str().map(str::to_string))
        .unwrap_or_else(|| body.to_string())
}

struct Client {
    http: reqwest::blocking::Client,
    server: String,
    user: String,
    user_header: String,
}

impl Client {
    fn new(server: &str, user: &str, user_header: &str) -> anyhow::Result<Self> {
        let http = reqwest::blocking::Client::builder()
            // Session end waits on the model and the PDF render
            .timeout(std::time::Duration::from_secs(120))
            .build()?;
        Ok(Self {
            http,
            server: server.trim_end_matches('/').to_string(),
            user: user.to_string(),
            user_header: user_header.to_string(),
        })
    }

    fn send(&self, req: reqwest::blocking::RequestBuilder) -> anyhow::Result<reqwest::blocking::Response> {
        let resp = req.header(self.user_header.as_str(), self.user.as_str()).send()?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().unwrap_or_default();
            anyhow::bail!("server returned {}: {}", status, error_message(&body));
        }
        Ok(resp)
    }

    fn greeting(&self) -> anyhow::Result<String> {
        let resp = self.send(self.http.get(format!("{}/greeting", self.server)))?;
        let body: serde_json::Value = resp.json()?;
        Ok(body["initial_response"].as_str().unwrap_or_default().to_string())
    }

    fn start(&self) -> anyhow::Result<StartResponse> {
        let resp = self.send(self.http.post(format!("{}/session/start", self.server)))?;
        Ok(resp.json()?)
    }

    fn chat(&self, message: &str) -> anyhow::Result<ChatResponse> {
        let body = serde_json::json!({ "message": message });
        let resp = self.send(self.http.post(format!("{}/chat", self.server)).json(&body))?;
        Ok(resp.json()?)
    }

    fn end(&self, out: &Path) -> anyhow::Result<PathBuf> {
        let resp = self.send(self.http.post(format!("{}/session/end", self.server)))?;
        let filename = resp
            .headers()
            .get(reqwest::header::CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .and_then(attachment_filename)
            .unwrap_or_else(|| format!("{}_prescription.pdf", self.user));
        let bytes = resp.bytes()?;

        std::fs::create_dir_all(out)?;
        let path = out.join(filename);
        std::fs::write(&path, &bytes)?;
        Ok(path)
    }
}

// ============================================================================
// Commands
// ============================================================================

fn do_chat(client: &Client, message: Option<String>) -> anyhow::Result<()> {
    if let Some(message) = message {
        let reply = client.chat(&message)?;
        println!("{}", reply.response);
        return Ok(());
    }

    println!("{}", client.greeting()?);
    println!("(type {} to finish and receive your prescription)", END_COMMAND);

    let stdin = std::io::stdin();
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            return Ok(());
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == END_COMMAND {
            let path = client.end(Path::new("."))?;
            println!("Prescription saved to {}", path.display());
            return Ok(());
        }

        let reply = client.chat(line)?;
        println!("{}\n", reply.response);
    }
}

fn do_status(server: &str) -> anyhow::Result<()> {
    let client = reqwest::blocking::Client::builder()
        .timeout(std::time::Duration::from_secs(10))
        .build()?;

    let url = format!("{}/health", server.trim_end_matches('/'));
    match client.get(&url).send() {
        Ok(r) if r.status().is_success() => {
            let body: serde_json::Value = r.json().unwrap_or_default();
            println!("Healthmate server: {}", body["status"].as_str().unwrap_or("unknown"));
            println!("Version:           {}", body["version"].as_str().unwrap_or("?"));
            println!("Store:             {}", body["store"].as_str().unwrap_or("?"));
            println!("Model:             {}", body["model"].as_str().unwrap_or("?"));
        }
        Ok(r) => {
            eprintln!("healthmate-cli: server unhealthy (HTTP {})", r.status());
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("healthmate-cli: cannot reach {}: {}", url, e);
            std::process::exit(1);
        }
    }

    Ok(())
}

// ============================================================================
// Main
// ============================================================================

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Status => do_status(&cli.server),
        command => match cli.user.as_deref() {
            Some(user) => Client::new(&cli.server, user, &cli.user_header)
                .and_then(|client| run(&client, command)),
            None => Err(anyhow::anyhow!("--user (or HEALTHMATE_USER) is required")),
        },
    };

    if let Err(e) = result {
        eprintln!("healthmate-cli: {}", e);
        std::process::exit(1);
    }
}

fn run(client: &Client, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Greeting => println!("{}", client.greeting()?),
        Commands::Start => {
            let started = client.start()?;
            let state = if started.created { "opened" } else { "resumed" };
            println!("Session {} {}", started.session_id, state);
        }
        Commands::Chat { message } => do_chat(client, message)?,
        Commands::End { out } => {
            let path = client.end(&out)?;
            println!("Prescription saved to {}", path.display());
        }
        Commands::Status => do_status(&client.server)?,
    }
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attachment_filename_quoted() {
        assert_eq!(
            attachment_filename("attachment; filename=\"alice_prescription_20240309_140507.pdf\""),
            Some("alice_prescription_20240309_140507.pdf".to_string())
        );
    }

    #[test]
    fn test_attachment_filename_strips_directories() {
        assert_eq!(
            attachment_filename("attachment; filename=\"../../etc/passwd\""),
            Some("passwd".to_string())
        );
        assert_eq!(attachment_filename("attachment"), None);
        assert_eq!(attachment_filename("attachment; filename=\"\""), None);
    }

    #[test]
    fn test_error_message_prefers_server_message() {
        assert_eq!(
            error_message(r#"{"status":"error","message":"No active chat session found"}"#),
            "No active chat session found"
        );
        assert_eq!(error_message("Bad Gateway"), "Bad Gateway");
    }

    #[test]
    fn test_cli_parses_end_with_output_dir() {
        let cli = Cli::try_parse_from([
            "healthmate-cli",
            "--user",
            "alice",
            "end",
            "--out",
            "/tmp/rx",
        ])
        .unwrap();
        assert_eq!(cli.user.as_deref(), Some("alice"));
        assert_eq!(cli.user_header, DEFAULT_USER_HEADER);
        match cli.command {
            Commands::End { out } => assert_eq!(out, PathBuf::from("/tmp/rx")),
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_chat_response_deserializes() {
        let reply: ChatResponse = serde_json::from_str(
            r#"{"response":"Rest well.","initial_response":"Hi alice, how are you feeling today?"}"#,
        )
        .unwrap();
        assert_eq!(reply.response, "Rest well.");
        assert!(reply.initial_response.starts_with("Hi alice"));
    }
}
