use crate::core::error::{FetchError, FetchResult};
use crate::core::naming::ResourceName;
use crate::plugins::registry::Transport;

pub const TRACING_TARGET: &str = "segfetch::command";

/// Payload a command handler answers with when it succeeded.
pub const COMMAND_OK: &str = "OK";

/// Issues one command request. Only a payload of exactly `"OK"` counts as
/// success; anything else comes back verbatim as [`FetchError::Refused`].
pub async fn run_command(transport: &dyn Transport, name: &ResourceName) -> FetchResult<()> {
    tracing::debug!(target: TRACING_TARGET, name = %name, "sending command");

    let response = transport
        .express(name)
        .await
        .map_err(|e| FetchError::from_transport(name, e))?;

    if response.payload.as_ref() == COMMAND_OK.as_bytes() {
        return Ok(());
    }

    let payload = String::from_utf8_lossy(&response.payload).into_owned();
    tracing::info!(target: TRACING_TARGET, name = %name, payload = %payload, "command refused");
    Err(FetchError::Refused { name: name.clone(), payload })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::TransportError;
    use crate::plugins::memory::driver::MemoryTransport;

    fn restore() -> ResourceName {
        "/localhost/dev/chronoshare/shared/cmd/restore/file/a.txt/%00%02".parse().unwrap()
    }

    #[tokio::test]
    async fn ok_payload_is_success() {
        let t = MemoryTransport::new();
        t.publish(restore(), "OK");
        run_command(&t, &restore()).await.unwrap();
    }

    #[tokio::test]
    async fn any_other_payload_is_passed_through() {
        let t = MemoryTransport::new();
        t.publish(restore(), "FAIL: Requested file is not found");
        let err = run_command(&t, &restore()).await.unwrap_err();
        assert!(matches!(err, FetchError::Refused { ref payload, .. } if payload == "FAIL: Requested file is not found"));

        t.publish(restore(), "OK: File already exists");
        assert!(matches!(run_command(&t, &restore()).await, Err(FetchError::Refused { .. })));
    }

    #[tokio::test]
    async fn timeout_and_errors_surface_as_failures() {
        let t = MemoryTransport::new();
        assert!(run_command(&t, &restore()).await.unwrap_err().is_timeout());

        t.fail(restore(), TransportError::Failed("socket closed".into()));
        let err = run_command(&t, &restore()).await.unwrap_err();
        assert!(matches!(err, FetchError::Transport { ref reason, .. } if reason == "socket closed"));
    }
}
