//! Local operator console.
//!
//! | Input | Effect |
//! |-------|--------|
//! | `save` | persist state now |
//! | `stop` | end the run (farewell, save, disconnect) |
//! | `join [channel]` | join a channel |
//! | `leave [channel]` | leave a channel |
//! | `reload` | rebuild handlers and restart periodic tasks |
//! | `state` | print the shared state as JSON |
//! | `send <text>` | send `text` as chat to a joined channel |
//!
//! Commands missing their channel ask for it on the next line.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, Lines};
use tracing::{debug, info};

use tmibot_core::{Engine, MessageKind};

const HELP: &str = "save\nstop\njoin\nleave\nreload\nstate\nsend <text>";

/// Why the console stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleExit {
    /// The operator asked the bot to stop.
    Stop,
    /// Input ended, or the engine shut down.
    Closed,
}

/// Reads operator commands from `input` and writes replies to `output`.
pub struct Console<R, W> {
    engine: Engine,
    input: Lines<R>,
    output: W,
}

impl Console<BufReader<tokio::io::Stdin>, tokio::io::Stdout> {
    /// A console on the process's stdin and stdout.
    pub fn stdio(engine: Engine) -> Self {
        Self::new(engine, BufReader::new(tokio::io::stdin()), tokio::io::stdout())
    }
}

impl<R, W> Console<R, W>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(engine: Engine, input: R, output: W) -> Self {
        Self {
            engine,
            input: input.lines(),
            output,
        }
    }

    /// Runs until `stop`, end of input, or engine shutdown.
    ///
    /// Failed engine operations are reported to the operator and do not end
    /// the console.
    pub async fn run(mut self) -> std::io::Result<ConsoleExit> {
        debug!("Console started");
        while let Some(line) = self.next_line().await? {
            if let Some(exit) = self.handle(line.trim()).await? {
                return Ok(exit);
            }
        }
        Ok(ConsoleExit::Closed)
    }

    async fn next_line(&mut self) -> std::io::Result<Option<String>> {
        let shutdown = self.engine.shutdown_token();
        tokio::select! {
            _ = shutdown.cancelled() => Ok(None),
            line = self.input.next_line() => line,
        }
    }

    async fn handle(&mut self, line: &str) -> std::io::Result<Option<ConsoleExit>> {
        let (command, rest) = line
            .split_once(char::is_whitespace)
            .map_or((line, ""), |(c, r)| (c, r.trim()));

        match command {
            "" => {}
            "save" => match self.engine.save().await {
                Ok(()) => self.print("Saved").await?,
                Err(e) => self.print(&format!("Save failed: {e}")).await?,
            },
            "stop" => {
                info!("Stop requested from console");
                return Ok(Some(ConsoleExit::Stop));
            }
            "join" => {
                let Some(channel) = self.channel_argument(rest).await? else {
                    return Ok(Some(ConsoleExit::Closed));
                };
                let reply = match self.engine.join_channel(&channel) {
                    Ok(true) => format!("Joined {channel}"),
                    Ok(false) => format!("Already following {channel}"),
                    Err(e) => e.to_string(),
                };
                self.print(&reply).await?;
            }
            "leave" => {
                let Some(channel) = self.channel_argument(rest).await? else {
                    return Ok(Some(ConsoleExit::Closed));
                };
                let reply = match self.engine.leave_channel(&channel) {
                    Ok(true) => format!("Left {channel}"),
                    Ok(false) => format!("Not following {channel}"),
                    Err(e) => e.to_string(),
                };
                self.print(&reply).await?;
            }
            "reload" => match self.engine.reload().await {
                Ok(()) => self.print("Reloaded").await?,
                Err(e) => self.print(&format!("Reload failed: {e}")).await?,
            },
            "state" => {
                let snapshot = self.engine.state().snapshot();
                let json = serde_json::to_string_pretty(&snapshot)
                    .unwrap_or_else(|e| format!("State is not printable: {e}"));
                self.print(&json).await?;
            }
            "send" if !rest.is_empty() => {
                let text = rest.to_string();
                let Some(channel) = self.prompt("Channel?").await? else {
                    return Ok(Some(ConsoleExit::Closed));
                };
                if !self.engine.is_joined(&channel) {
                    self.print(&format!("Not following {channel}")).await?;
                } else if let Err(e) = self.engine.send_to(&channel, text, MessageKind::Chat) {
                    self.print(&e.to_string()).await?;
                }
            }
            _ => self.print(HELP).await?,
        }
        Ok(None)
    }

    /// `inline` if present, otherwise the next input line.
    async fn channel_argument(&mut self, inline: &str) -> std::io::Result<Option<String>> {
        if !inline.is_empty() {
            return Ok(Some(inline.to_string()));
        }
        self.prompt("Which channel?").await
    }

    async fn prompt(&mut self, question: &str) -> std::io::Result<Option<String>> {
        self.print(question).await?;
        Ok(self.next_line().await?.map(|l| l.trim().to_string()))
    }

    async fn print(&mut self, text: &str) -> std::io::Result<()> {
        self.output.write_all(text.as_bytes()).await?;
        self.output.write_all(b"\n").await?;
        self.output.flush().await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tmibot_core::{MemoryBackend, SenderConfig};

    use super::*;

    fn engine() -> Engine {
        Engine::builder("tmibot")
            .sender_config(SenderConfig::unpaced(20, Duration::from_secs(30)))
            .build()
    }

    async fn run(engine: &Engine, input: &str) -> (ConsoleExit, String) {
        let mut output = Vec::new();
        let exit = Console::new(engine.clone(), input.as_bytes(), &mut output)
            .run()
            .await
            .unwrap();
        (exit, String::from_utf8(output).unwrap())
    }

    #[tokio::test]
    async fn join_prompts_for_channel() {
        let engine = engine();
        let (exit, output) = run(&engine, "join\nLobby\njoin other\n").await;

        assert_eq!(exit, ConsoleExit::Closed);
        assert_eq!(output, "Which channel?\nJoined Lobby\nJoined other\n");
        assert_eq!(engine.channels(), vec!["lobby", "other"]);
    }

    #[tokio::test]
    async fn leave_unknown_channel() {
        let engine = engine();
        engine.join_channel("lobby").unwrap();
        let (_, output) = run(&engine, "leave\nnowhere\nleave lobby\n").await;

        assert_eq!(output, "Which channel?\nNot following nowhere\nLeft lobby\n");
        assert!(engine.channels().is_empty());
    }

    #[tokio::test]
    async fn send_requires_joined_channel() {
        let engine = engine();
        engine.join_channel("lobby").unwrap();
        let (_, output) = run(&engine, "send hello there\nelsewhere\nsend hi\nlobby\n").await;

        assert_eq!(output, "Channel?\nNot following elsewhere\nChannel?\n");
        assert_eq!(engine.sender().pending(), 1);
    }

    #[tokio::test]
    async fn stop_ends_console() {
        let engine = engine();
        let (exit, output) = run(&engine, "stop\njoin lobby\n").await;

        assert_eq!(exit, ConsoleExit::Stop);
        assert!(output.is_empty());
        assert!(engine.channels().is_empty());
    }

    #[tokio::test]
    async fn unknown_input_prints_help() {
        let (_, output) = run(&engine(), "dance\n").await;
        assert_eq!(output, format!("{HELP}\n"));
    }

    #[tokio::test]
    async fn save_and_state() {
        let backend = std::sync::Arc::new(MemoryBackend::new());
        let engine = Engine::builder("tmibot")
            .backend(backend.clone())
            .sender_config(SenderConfig::unpaced(20, Duration::from_secs(30)))
            .build();
        engine.join_channel("lobby").unwrap();

        let (_, output) = run(&engine, "save\nstate\n").await;

        assert!(output.starts_with("Saved\n"));
        assert!(output.contains("\"lobby\""));
        assert_eq!(backend.save_count(), 1);
    }
}
