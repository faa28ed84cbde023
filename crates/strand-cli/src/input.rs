//! Line-oriented playback controls read from stdin

use strand_core::Command;

/// Help text printed at startup
pub const HELP: &str = "controls: [p]ause/play, [s]eek <ms>, [q]uality, [i]nfo, [x] quit";

/// One parsed control line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Session(Command),
    Info,
    Quit,
    Help,
}

/// Parse a control line. Unknown input yields `Err` with a message.
pub fn parse_line(line: &str) -> Result<Option<Input>, String> {
    let mut parts = line.split_whitespace();
    let Some(word) = parts.next() else {
        return Ok(None);
    };

    let input = match word.to_lowercase().as_str() {
        "p" | "play" | "pause" | "toggle" => Input::Session(Command::TogglePlayPause),
        "s" | "seek" => {
            let target = parts
                .next()
                .ok_or_else(|| "usage: seek <ms>".to_string())?
                .parse::<u64>()
                .map_err(|_| "seek target must be milliseconds".to_string())?;
            Input::Session(Command::Seek(target))
        }
        "q" | "quality" => Input::Session(Command::ToggleQuality),
        "i" | "info" => Input::Info,
        "x" | "quit" | "exit" => Input::Quit,
        "h" | "help" | "?" => Input::Help,
        other => return Err(format!("unknown command '{}'", other)),
    };
    Ok(Some(input))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_controls() {
        assert_eq!(parse_line("p").unwrap(), Some(Input::Session(Command::TogglePlayPause)));
        assert_eq!(parse_line("seek 5000").unwrap(), Some(Input::Session(Command::Seek(5000))));
        assert_eq!(parse_line(" Q ").unwrap(), Some(Input::Session(Command::ToggleQuality)));
        assert_eq!(parse_line("x").unwrap(), Some(Input::Quit));
        assert_eq!(parse_line("").unwrap(), None);
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_line("seek").is_err());
        assert!(parse_line("seek soon").is_err());
        assert!(parse_line("rewind").is_err());
    }
}
