use anyhow::Result;

use fleetlog_core::SyncError;
use fleetlog_core::sync::{SyncEngine, SyncReport};

use crate::identity::FileIdentity;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SyncAction {
    Upload,
    Download,
    Sync,
}

/// Attach the next step the user should take to errors that need one.
fn with_hint(err: SyncError) -> anyhow::Error {
    let hint = match &err {
        SyncError::AuthRequired => Some("Run `fleetlog login` or check FLEETLOG_API_KEY"),
        SyncError::ConfigurationMissing(_) => {
            Some("Point FLEETLOG_REMOTE_URL at a `fleetlog serve` instance")
        }
        SyncError::NoRemoteBackup => {
            Some("Run `fleetlog upload` or `fleetlog sync` from a device that has data")
        }
        SyncError::RemoteConflict { .. } => {
            Some("Another device synced meanwhile; run `fleetlog sync` again")
        }
        _ => None,
    };
    match hint {
        Some(hint) => anyhow::Error::new(err).context(hint),
        None => anyhow::Error::new(err),
    }
}

pub(crate) async fn cmd_sync(engine: &SyncEngine, action: SyncAction, json: bool) -> Result<()> {
    let result = match action {
        SyncAction::Upload => engine.upload().await,
        SyncAction::Download => engine.download().await,
        SyncAction::Sync => engine.sync_now().await,
    };
    let report = result.map_err(with_hint)?;
    print_report(&report, json)
}

fn print_report(report: &SyncReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else {
        println!("{}", report.message);
        if report.local_written {
            println!("  Local data replaced");
        }
        if report.remote_written {
            println!("  Remote backup written");
        }
    }
    Ok(())
}

pub(crate) fn cmd_login(identity: &FileIdentity, user: Option<&str>, json: bool) -> Result<()> {
    let user_id = identity.login(user)?;

    if json {
        println!("{}", serde_json::json!({ "user_id": user_id }));
    } else {
        println!("Signed in as {user_id}");
    }
    Ok(())
}

pub(crate) fn cmd_logout(identity: &FileIdentity, json: bool) -> Result<()> {
    let was_signed_in = identity.logout()?;

    if json {
        println!("{}", serde_json::json!({ "signed_out": was_signed_in }));
    } else if was_signed_in {
        println!("Signed out");
    } else {
        eprintln!("Not signed in");
    }
    Ok(())
}

pub(crate) fn cmd_whoami(identity: &FileIdentity, json: bool) -> Result<()> {
    let user_id = identity.read()?;

    if json {
        println!("{}", serde_json::json!({ "user_id": user_id }));
    } else {
        match user_id {
            Some(id) => println!("{id}"),
            None => eprintln!("Not signed in. Use `fleetlog login` to sign in."),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::remote_client::HttpRemoteStore;
    use fleetlog_core::FleetService;
    use fleetlog_core::legacy::JsonLegacyStore;

    #[test]
    fn test_hint_is_prepended() {
        let err = with_hint(SyncError::AuthRequired);
        let message = format!("{err:#}");
        assert!(message.starts_with("Run `fleetlog login`"));
        assert!(message.contains("sign in required"));
        assert!(err.downcast_ref::<SyncError>().is_some());
    }

    #[test]
    fn test_unavailable_has_no_hint() {
        let err = with_hint(SyncError::RemoteUnavailable("timeout".into()));
        assert_eq!(format!("{err:#}"), "remote store unavailable: timeout");
    }

    #[tokio::test]
    async fn test_sync_without_login_fails_before_network() {
        let dir = tempfile::tempdir().unwrap();
        let identity = Arc::new(FileIdentity::new(&dir.path().join("identity")));
        let svc = FleetService::open_in_memory(&JsonLegacyStore::from_json("{}").unwrap()).unwrap();
        // Port 9 (discard) is never contacted: identity is checked first.
        let remote = HttpRemoteStore::new(Some("http://127.0.0.1:9"), None).unwrap();
        let engine = SyncEngine::new(Arc::new(svc), Arc::new(remote), identity);

        let err = cmd_sync(&engine, SyncAction::Sync, false).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SyncError>(),
            Some(SyncError::AuthRequired)
        ));
    }

    #[test]
    fn test_login_whoami_logout() {
        let dir = tempfile::tempdir().unwrap();
        let identity = FileIdentity::new(&dir.path().join("identity"));
        cmd_login(&identity, Some("driver-7"), false).unwrap();
        assert_eq!(identity.read().unwrap().as_deref(), Some("driver-7"));
        cmd_whoami(&identity, true).unwrap();
        cmd_logout(&identity, false).unwrap();
        assert!(identity.read().unwrap().is_none());
    }
}
