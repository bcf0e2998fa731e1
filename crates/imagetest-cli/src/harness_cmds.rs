//! CLI handlers for harness lifecycle subcommands.
//!
//! Implements:
//! - `imagetest plan <file>`    -- print the resolved container options
//! - `imagetest create <file>`  -- provision a harness from a TOML file
//! - `imagetest read <id>`      -- reconcile stored state with the engine
//! - `imagetest update <file>`  -- re-apply a harness definition
//! - `imagetest delete <id>`    -- tear down a harness and forget it
//! - `imagetest list`           -- list stored harnesses

use std::path::Path;

use anyhow::{Context, Result, bail};

use imagetest_core::spec::{HarnessSpec, parse_harness_toml};
use imagetest_core::{HarnessController, HarnessError, HarnessState};

use crate::state::StateStore;

fn load_spec(file: &Path) -> Result<HarnessSpec> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read harness file: {}", file.display()))?;
    let spec = parse_harness_toml(&content)
        .with_context(|| format!("failed to parse harness file: {}", file.display()))?;
    Ok(spec)
}

// -----------------------------------------------------------------------
// imagetest plan <file>
// -----------------------------------------------------------------------

pub fn cmd_plan(ctl: &HarnessController, file: &Path, json: bool) -> Result<()> {
    let spec = load_spec(file)?;
    let options = ctl.options(&spec)?;
    let plan = ctl.plan(&spec)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
        return Ok(());
    }

    println!("Harness {} ({})", spec.id, spec.name);
    println!();
    for (i, option) in options.iter().enumerate() {
        println!("  {:>2}. {option}", i + 1);
    }
    println!();
    println!("  Plan fingerprint: {}", plan.fingerprint());
    Ok(())
}

// -----------------------------------------------------------------------
// imagetest create <file>
// -----------------------------------------------------------------------

pub async fn cmd_create(ctl: &HarnessController, store: &StateStore, file: &Path) -> Result<()> {
    let spec = load_spec(file)?;
    if let Some(existing) = store.load(&spec.id)? {
        if !existing.skipped {
            bail!(
                "harness {} already exists; use `imagetest update` or `imagetest delete` first",
                spec.id
            );
        }
    }

    let id = spec.id.clone();
    match ctl.create(spec.clone()).await {
        Ok(state) => {
            store.save(&state)?;
            if state.skipped {
                println!("Harness {id} skipped.");
            } else {
                println!("Harness {id} created.");
            }
            Ok(())
        }
        // Validation fails before any engine call; nothing to reclaim.
        Err(e @ HarnessError::Validation { .. }) => Err(e.into()),
        Err(e) => {
            // Keep the state so `delete` can reclaim partial resources.
            store.save(&HarnessState {
                spec,
                skipped: false,
            })?;
            Err(e).context(format!("run `imagetest delete {id}` to clean up"))
        }
    }
}

// -----------------------------------------------------------------------
// imagetest read <id>
// -----------------------------------------------------------------------

pub async fn cmd_read(ctl: &HarnessController, store: &StateStore, id: &str) -> Result<()> {
    let Some(state) = store.load(id)? else {
        bail!("no state recorded for harness {id}");
    };

    match ctl.read(state).await? {
        Some(state) => {
            store.save(&state)?;
            println!("{}", serde_json::to_string_pretty(&state)?);
        }
        None => {
            store.remove(id)?;
            println!("Harness {id} no longer exists; state removed.");
        }
    }
    Ok(())
}

// -----------------------------------------------------------------------
// imagetest update <file>
// -----------------------------------------------------------------------

pub async fn cmd_update(ctl: &HarnessController, store: &StateStore, file: &Path) -> Result<()> {
    let spec = load_spec(file)?;
    if store.load(&spec.id)?.is_none() {
        bail!("no state recorded for harness {}; use `imagetest create`", spec.id);
    }

    let state = ctl.update(spec).await?;
    store.save(&state)?;
    println!("Harness {} updated.", state.id());
    Ok(())
}

// -----------------------------------------------------------------------
// imagetest delete <id>
// -----------------------------------------------------------------------

pub async fn cmd_delete(ctl: &HarnessController, store: &StateStore, id: &str) -> Result<()> {
    // Without recorded state, still sweep whatever the engine holds for `id`.
    let state = store.load(id)?.unwrap_or_else(|| HarnessState {
        spec: HarnessSpec::new(id, id),
        skipped: false,
    });

    ctl.delete(&state).await?;
    store.remove(id)?;
    println!("Harness {id} deleted.");
    Ok(())
}

// -----------------------------------------------------------------------
// imagetest list
// -----------------------------------------------------------------------

pub fn cmd_list(store: &StateStore) -> Result<()> {
    let states = store.list()?;
    if states.is_empty() {
        println!("No harnesses recorded in {}.", store.dir().display());
        return Ok(());
    }

    println!("{:<24} {:<24} {:<8} IMAGE", "ID", "NAME", "SKIPPED");
    for state in &states {
        println!(
            "{:<24} {:<24} {:<8} {}",
            state.spec.id, state.spec.name, state.skipped, state.spec.image
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use imagetest_core::skip::TestSelection;
    use imagetest_test_utils::{EngineCall, FailPoint, FakeEngine};

    const H1: &str = r#"
id = "h1"
name = "first"
image = "repo/img:tag"

[[mounts]]
source = "/a"
destination = "/b"
"#;

    struct Fixture {
        _tmp: tempfile::TempDir,
        engine: FakeEngine,
        ctl: HarnessController,
        store: StateStore,
        file: std::path::PathBuf,
    }

    fn fixture() -> Fixture {
        let tmp = tempfile::TempDir::new().unwrap();
        let file = tmp.path().join("h1.toml");
        std::fs::write(&file, H1).unwrap();
        let engine = FakeEngine::new();
        let ctl = HarnessController::new(Arc::new(engine.clone()));
        let store = StateStore::new(tmp.path().join("state"));
        Fixture {
            _tmp: tmp,
            engine,
            ctl,
            store,
            file,
        }
    }

    #[tokio::test]
    async fn create_read_delete_cycle() {
        let f = fixture();

        cmd_create(&f.ctl, &f.store, &f.file).await.unwrap();
        assert!(f.engine.has_volume("h1-config"));
        assert!(f.store.load("h1").unwrap().is_some());

        cmd_read(&f.ctl, &f.store, "h1").await.unwrap();
        assert!(f.store.load("h1").unwrap().is_some());

        cmd_delete(&f.ctl, &f.store, "h1").await.unwrap();
        assert!(!f.engine.has_volume("h1-config"));
        assert!(f.store.load("h1").unwrap().is_none());
    }

    #[tokio::test]
    async fn create_twice_is_rejected() {
        let f = fixture();
        cmd_create(&f.ctl, &f.store, &f.file).await.unwrap();
        let err = cmd_create(&f.ctl, &f.store, &f.file).await.unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }

    #[tokio::test]
    async fn failed_create_keeps_state_for_delete() {
        let f = fixture();
        f.engine.fail_at(FailPoint::Setup, "boom");

        let err = cmd_create(&f.ctl, &f.store, &f.file).await.unwrap_err();
        assert!(format!("{err:#}").contains("imagetest delete h1"));
        assert!(f.store.load("h1").unwrap().is_some());

        cmd_delete(&f.ctl, &f.store, "h1").await.unwrap();
        assert!(!f.engine.has_volume("h1-config"));
        assert!(f.store.load("h1").unwrap().is_none());
    }

    #[tokio::test]
    async fn invalid_create_leaves_no_state() {
        let f = fixture();
        std::fs::write(&f.file, H1.replace("repo/img:tag", "Not A Ref")).unwrap();

        let err = cmd_create(&f.ctl, &f.store, &f.file).await.unwrap_err();
        assert!(!format!("{err:#}").contains("imagetest delete"));
        assert!(f.store.load("h1").unwrap().is_none());
        assert!(f.engine.calls().is_empty());

        std::fs::write(&f.file, H1).unwrap();
        cmd_create(&f.ctl, &f.store, &f.file).await.unwrap();
        assert!(f.store.load("h1").unwrap().is_some());
    }

    #[tokio::test]
    async fn timed_out_create_keeps_state_for_delete() {
        let f = fixture();
        std::fs::write(&f.file, format!("{H1}\n[timeouts]\ncreate = \"50ms\"\n")).unwrap();
        f.engine.delay_at(FailPoint::Setup, std::time::Duration::from_secs(5));

        let err = cmd_create(&f.ctl, &f.store, &f.file).await.unwrap_err();
        assert!(format!("{err:#}").contains("imagetest delete h1"));
        assert!(f.store.load("h1").unwrap().is_some());
    }

    #[tokio::test]
    async fn skipped_create_is_recorded() {
        let tmp = tempfile::TempDir::new().unwrap();
        let file = tmp.path().join("h1.toml");
        std::fs::write(&file, H1).unwrap();
        let engine = FakeEngine::new();
        let ctl = HarnessController::new(Arc::new(engine.clone())).with_skip_policy(Arc::new(
            TestSelection {
                skip_all: true,
                ..Default::default()
            },
        ));
        let store = StateStore::new(tmp.path());

        cmd_create(&ctl, &store, &file).await.unwrap();
        assert!(store.load("h1").unwrap().unwrap().skipped);
        assert!(engine.calls().is_empty());
    }

    #[tokio::test]
    async fn read_drops_state_when_volume_is_gone() {
        let f = fixture();
        cmd_create(&f.ctl, &f.store, &f.file).await.unwrap();
        f.ctl
            .delete(&f.store.load("h1").unwrap().unwrap())
            .await
            .unwrap();

        cmd_read(&f.ctl, &f.store, "h1").await.unwrap();
        assert!(f.store.load("h1").unwrap().is_none());
    }

    #[tokio::test]
    async fn update_requires_state() {
        let f = fixture();
        assert!(cmd_update(&f.ctl, &f.store, &f.file).await.is_err());

        cmd_create(&f.ctl, &f.store, &f.file).await.unwrap();
        cmd_update(&f.ctl, &f.store, &f.file).await.unwrap();
        assert_eq!(f.engine.created_plans().len(), 2);
    }

    #[tokio::test]
    async fn delete_unknown_id_sweeps_engine() {
        let f = fixture();
        cmd_delete(&f.ctl, &f.store, "ghost").await.unwrap();
        assert_eq!(
            f.engine.calls(),
            vec![
                EngineCall::RemoveContainer("ghost".to_string()),
                EngineCall::RemoveVolume("ghost-config".to_string()),
            ]
        );
    }

    #[test]
    fn plan_and_list_need_no_engine() {
        let f = fixture();
        cmd_plan(&f.ctl, &f.file, false).unwrap();
        cmd_plan(&f.ctl, &f.file, true).unwrap();
        cmd_list(&f.store).unwrap();
        assert!(f.engine.calls().is_empty());
    }

    #[test]
    fn plan_reports_bad_file() {
        let f = fixture();
        let missing = f.file.with_file_name("missing.toml");
        let err = cmd_plan(&f.ctl, &missing, false).unwrap_err();
        assert!(err.to_string().contains("failed to read harness file"));
    }
}
