//! Interactive command loop.

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use atlink_core::service::ModemService;

use crate::render;

const HELP: &str = "\
AT commands are sent to the modem as typed.
  /signal   parsed signal snapshot
  /help     this text
  /quit     end the session
";

/// One line of operator input.
#[derive(Debug, PartialEq, Eq)]
pub enum Input<'a> {
    Empty,
    Quit,
    Signal,
    Help,
    Unknown(&'a str),
    Command(&'a str),
}

impl<'a> Input<'a> {
    pub fn parse(line: &'a str) -> Self {
        let line = line.trim();
        match line {
            "" => Input::Empty,
            "/quit" | "/exit" => Input::Quit,
            "/signal" => Input::Signal,
            "/help" | "?" => Input::Help,
            other if other.starts_with('/') => Input::Unknown(other),
            other => Input::Command(other),
        }
    }
}

pub async fn run(service: &ModemService, token: &str) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    stdout.write_all(b"at> ").await?;
    stdout.flush().await?;

    while let Some(line) = lines.next_line().await? {
        match Input::parse(&line) {
            Input::Empty => {}
            Input::Quit => break,
            Input::Help => stdout.write_all(HELP.as_bytes()).await?,
            Input::Unknown(cmd) => eprintln!("unknown console command {cmd}, try /help"),
            Input::Signal => match service.fetch_signal_snapshot(token).await {
                Ok(snapshot) => {
                    stdout
                        .write_all(render::summary(&snapshot).as_bytes())
                        .await?
                }
                Err(err) if err.ends_session() => return Err(err.into()),
                Err(err) => eprintln!("error: {}", err.client_message()),
            },
            Input::Command(at) => match service.run_command(token, at).await {
                Ok(output) => {
                    stdout.write_all(output.trim_end().as_bytes()).await?;
                    stdout.write_all(b"\n").await?;
                }
                Err(err) if err.ends_session() => return Err(err.into()),
                Err(err) => eprintln!("error: {}", err.client_message()),
            },
        }
        stdout.write_all(b"at> ").await?;
        stdout.flush().await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_console_commands() {
        assert_eq!(Input::parse("  "), Input::Empty);
        assert_eq!(Input::parse("/quit"), Input::Quit);
        assert_eq!(Input::parse(" /signal "), Input::Signal);
        assert_eq!(Input::parse("?"), Input::Help);
        assert_eq!(Input::parse("/reboot"), Input::Unknown("/reboot"));
    }

    #[test]
    fn everything_else_is_an_at_command() {
        assert_eq!(Input::parse(" AT+CSQ "), Input::Command("AT+CSQ"));
        assert_eq!(
            Input::parse("AT+QENG=\"servingcell\""),
            Input::Command("AT+QENG=\"servingcell\"")
        );
    }
}
