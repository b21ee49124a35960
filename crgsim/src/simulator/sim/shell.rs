use crate::error::Result;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
  Step(u32), // Step N reference ticks
  Read(u32), // Read one CSR
  ToggleReset,
  Continue,
  Quit,
}

const HELP: &str =
  "Use Enter to step, 'si 100' to step N ticks, 'x 0x04' to read a register, 'rst' to toggle reset, 'c' to continue, 'q' to quit";

fn parse_number(s: &str) -> std::result::Result<u32, String> {
  let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
    Some(hex) => u32::from_str_radix(hex, 16),
    None => s.parse::<u32>(),
  };
  parsed.map_err(|e| format!("invalid number '{}': {}", s, e))
}

/// Parse one shell line; `Err` carries the message shown to the user.
pub fn parse_command(line: &str) -> std::result::Result<Command, String> {
  let trimmed = line.trim();

  // Empty input: step once
  if trimmed.is_empty() {
    return Ok(Command::Step(1));
  }

  if let Some(rest) = trimmed.strip_prefix("si") {
    let num_str = rest.trim();
    if num_str.is_empty() {
      return Err("'si' requires a number, e.g., 'si 100'".to_string());
    }
    return match parse_number(num_str)? {
      0 => Err("step count must be greater than 0".to_string()),
      n => Ok(Command::Step(n)),
    };
  }

  if let Some(rest) = trimmed.strip_prefix("x ") {
    return parse_number(rest.trim()).map(Command::Read);
  }

  match trimmed {
    "q" => Ok(Command::Quit),
    "c" => Ok(Command::Continue),
    "rst" => Ok(Command::ToggleReset),
    other => Err(format!("Unknown command: '{}'. {}", other, HELP)),
  }
}

pub struct Shell {
  editor: DefaultEditor,
}

impl Shell {
  pub fn new() -> Result<Self> {
    Ok(Self {
      editor: DefaultEditor::new()?,
    })
  }

  pub fn read_command(&mut self) -> Result<Command> {
    loop {
      match self.editor.readline("(crgsim) ") {
        Ok(line) => {
          let trimmed = line.trim();
          if !trimmed.is_empty() {
            let _ = self.editor.add_history_entry(trimmed);
          }
          match parse_command(trimmed) {
            Ok(cmd) => return Ok(cmd),
            Err(msg) => eprintln!("Error: {}", msg),
          }
        },
        // Ctrl-C / Ctrl-D: quit
        Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => return Ok(Command::Quit),
        Err(err) => return Err(err.into()),
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_step_commands() {
    assert_eq!(parse_command(""), Ok(Command::Step(1)));
    assert_eq!(parse_command("si 100"), Ok(Command::Step(100)));
    assert!(parse_command("si").is_err());
    assert!(parse_command("si 0").is_err());
  }

  #[test]
  fn parses_register_reads() {
    assert_eq!(parse_command("x 0x34"), Ok(Command::Read(0x34)));
    assert_eq!(parse_command("x 8"), Ok(Command::Read(8)));
    assert!(parse_command("x zz").is_err());
  }

  #[test]
  fn rejects_unknown() {
    assert_eq!(parse_command("q"), Ok(Command::Quit));
    assert!(parse_command("bogus").is_err());
  }
}
