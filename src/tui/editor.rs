//! Hands the prompt-line text to an external editor and reads it back.
//!
//! The caller must leave the alternate screen first and re-enter it after;
//! this module only deals with the temp file and the child process.

use std::fs;
use std::io::{self, Write};
use std::process::Command;

use log::info;

/// Splits `"code --wait"` into the program and its leading arguments with
/// shell quoting rules, so `'/opt/my editor/ed' -w` keeps the space.
pub fn split_command(command: &str) -> io::Result<(String, Vec<String>)> {
    let mut parts = shell_words::split(command.trim())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, format!("editor command: {e}")))?
        .into_iter();
    match parts.next() {
        Some(program) if !program.is_empty() => Ok((program, parts.collect())),
        _ => Err(io::Error::new(io::ErrorKind::InvalidInput, "no editor configured")),
    }
}

/// Writes `text` to a temp file, runs `editor` on it and returns what the
/// file holds afterwards, on one line.
pub fn edit_text(editor: &str, text: &str) -> io::Result<String> {
    let (program, args) = split_command(editor)?;
    let mut file = tempfile::Builder::new()
        .prefix("sheetdeck-edit-")
        .suffix(".txt")
        .tempfile()?;
    file.write_all(text.as_bytes())?;
    file.flush()?;
    info!("Running editor {} on {:?}", program, file.path());

    let status = Command::new(&program).args(&args).arg(file.path()).status()?;
    if !status.success() {
        return Err(io::Error::other(format!("{program} exited with {status}")));
    }
    // Editors often replace the file, so read it back by path.
    let edited = fs::read_to_string(file.path())?;
    Ok(edited.trim_end_matches(['\n', '\r']).replace(['\n', '\r'], " "))
}
