//! Cross-adapter file operations exposed directly on `Engine`.

use crate::adapter::Adapter;
use crate::error::{Result, XecError};
use crate::events::{Event, EventBus};

pub async fn read_file(
    adapter: &dyn Adapter,
    events: &EventBus,
    path: &str,
) -> Result<Vec<u8>> {
    let command = crate::command::CommandBuilder::new("cat", vec![path.to_string()]).build();
    let result = adapter.execute(&command, 64 * 1024 * 1024).await?;
    if !result.ok() {
        return Err(XecError::Command {
            command: result.command_line.clone(),
            exit_code: result.status.code(),
            signal: None,
            cause: format!("read_file failed for {path}"),
            stdout: result.stdout.clone(),
            stderr: result.stderr.clone(),
            duration: result.duration,
        });
    }
    events.emit(Event::FileRead {
        path: path.to_string(),
        size: Some(result.stdout.len() as u64),
        adapter: adapter.kind(),
        timestamp: crate::events::now_millis(),
    });
    Ok(result.stdout)
}

pub async fn write_file(
    adapter: &dyn Adapter,
    events: &EventBus,
    path: &str,
    contents: &[u8],
) -> Result<()> {
    let command = crate::command::CommandBuilder::new("tee", vec![path.to_string()])
        .stdin(crate::command::StdinSource::Bytes(std::sync::Arc::from(contents)))
        .stdout(crate::command::Sink::Ignore)
        .build();
    let result = adapter.execute(&command, 4096).await?;
    if !result.ok() {
        return Err(XecError::Command {
            command: result.command_line.clone(),
            exit_code: result.status.code(),
            signal: None,
            cause: format!("write_file failed for {path}"),
            stdout: result.stdout.clone(),
            stderr: result.stderr.clone(),
            duration: result.duration,
        });
    }
    events.emit(Event::FileWrite {
        path: path.to_string(),
        size: Some(contents.len() as u64),
        adapter: adapter.kind(),
        timestamp: crate::events::now_millis(),
    });
    Ok(())
}

pub async fn delete_file(adapter: &dyn Adapter, events: &EventBus, path: &str) -> Result<()> {
    let command = crate::command::CommandBuilder::new("rm", vec!["-f".to_string(), path.to_string()]).build();
    let result = adapter.execute(&command, 4096).await?;
    if !result.ok() {
        return Err(XecError::Command {
            command: result.command_line.clone(),
            exit_code: result.status.code(),
            signal: None,
            cause: format!("delete_file failed for {path}"),
            stdout: result.stdout.clone(),
            stderr: result.stderr.clone(),
            duration: result.duration,
        });
    }
    events.emit(Event::FileDelete {
        path: path.to_string(),
        adapter: adapter.kind(),
        timestamp: crate::events::now_millis(),
    });
    Ok(())
}
