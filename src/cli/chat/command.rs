use eyre::{Result, bail, eyre};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Plain text, appended to the draft and sent.
    Ask(String),
    Attach(String),
    Detach,
    Send,
    Theme,
    History,
    /// 1-based position in the history panel.
    Delete(usize),
    Clear,
    Help,
    Quit,
}

impl Command {
    pub fn parse(line: &str) -> Result<Self> {
        let line = line.trim();
        let Some(rest) = line.strip_prefix('/') else {
            return Ok(Command::Ask(line.to_string()));
        };

        let (name, arg) = match rest.split_once(char::is_whitespace) {
            Some((name, arg)) => (name, arg.trim()),
            None => (rest, ""),
        };

        let command = match name {
            "attach" => {
                if arg.is_empty() {
                    bail!("Usage: /attach <path>");
                }
                Command::Attach(arg.to_string())
            }
            "detach" => Command::Detach,
            "send" => Command::Send,
            "theme" => Command::Theme,
            "history" => Command::History,
            "delete" => {
                let n: usize = arg.parse().map_err(|_| eyre!("Usage: /delete <n>"))?;
                if n == 0 {
                    bail!("History entries are numbered from 1");
                }
                Command::Delete(n)
            }
            "clear" => Command::Clear,
            "help" => Command::Help,
            "quit" | "exit" => Command::Quit,
            _ => bail!("Unknown command: /{}", name),
        };

        Ok(command)
    }
}
