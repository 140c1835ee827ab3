//! Integration tests against a live MySQL state store.
//!
//! These run with `cargo test -- --ignored` on a machine with a local
//! MySQL instance accepting `root` with no password. Each test uses its
//! own schema, so they can run in parallel.

use std::collections::BTreeSet;
use std::sync::Arc;

use futures::FutureExt;
use uuid::Uuid;

use myfab::args::Args;
use myfab::executor::{Checkpoint, FnAction, JobContext, JobSpec, Outcome};
use myfab::sharding::NullSnapshotter;
use myfab::store::StateStore;
use myfab::Context;
use myfab_config::Config;

fn test_config(database: &str) -> Config {
    let mut config = Config::default();
    config.storage.address = "127.0.0.1:3306".into();
    config.storage.user = "root".into();
    config.storage.password = std::env::var("MYSQL_PASSWORD").unwrap_or_default();
    config.storage.database = database.into();
    config.failure_tracking.enabled = false;
    config
}

async fn fresh_store(database: &str) -> StateStore {
    let config = test_config(database);
    let store = StateStore::from_config(&config.storage).unwrap();
    store.teardown().await.unwrap();
    store.setup().await.unwrap();
    store
}

#[tokio::test]
#[ignore = "requires a MySQL state store on 127.0.0.1:3306"]
async fn schema_setup_and_teardown() {
    let store = fresh_store("myfab_test_schema").await;

    let mut persister = store.connect().await.unwrap();
    let rows = persister
        .exec_stmt("SELECT COUNT(*) FROM checkpoints", ())
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);

    store.teardown().await.unwrap();
    assert!(persister
        .exec_stmt("SELECT COUNT(*) FROM checkpoints", ())
        .await
        .is_err());
}

#[tokio::test]
#[ignore = "requires a MySQL state store on 127.0.0.1:3306"]
async fn checkpoint_log_lifecycle() {
    let store = fresh_store("myfab_test_checkpoints").await;
    let mut persister = store.connect().await.unwrap();

    let proc_uuid = Uuid::new_v4();
    let lockables: BTreeSet<String> = ["g1".to_string()].into_iter().collect();

    let mut first = Checkpoint::new(
        proc_uuid,
        Uuid::new_v4(),
        "test.first".into(),
        Args::new().with("g1"),
        lockables.clone(),
    );
    let second = Checkpoint::new(
        proc_uuid,
        Uuid::new_v4(),
        "test.second".into(),
        Args::new(),
        lockables.clone(),
    );

    first.schedule(&mut persister).await.unwrap();
    second.schedule(&mut persister).await.unwrap();

    // Sequences are allocated in insertion order.
    let fetched = Checkpoint::fetch(&mut persister, proc_uuid).await.unwrap();
    assert_eq!(fetched.len(), 2);
    assert_eq!(fetched[0].sequence, Some(1));
    assert_eq!(fetched[1].sequence, Some(2));
    assert_eq!(fetched[0].args.get(0).unwrap().as_str().unwrap(), "g1");
    assert_eq!(fetched[0].lockables, lockables);

    // Everything is scheduled, nothing is interrupted yet.
    assert_eq!(Checkpoint::scheduled(&mut persister).await.unwrap().len(), 2);
    assert!(Checkpoint::unfinished(&mut persister).await.unwrap().is_empty());

    // Start the first job: it becomes the interrupted one.
    first.begin(&mut persister).await.unwrap();
    let unfinished = Checkpoint::unfinished(&mut persister).await.unwrap();
    assert_eq!(unfinished.len(), 1);
    assert_eq!(unfinished[0].action_fqn, "test.first");

    // Finish it: no interruption any more.
    first.finish(&mut persister).await.unwrap();
    assert!(Checkpoint::unfinished(&mut persister).await.unwrap().is_empty());

    Checkpoint::remove(&mut persister, proc_uuid).await.unwrap();
    assert!(Checkpoint::fetch(&mut persister, proc_uuid)
        .await
        .unwrap()
        .is_empty());

    store.teardown().await.unwrap();
}

#[tokio::test]
#[ignore = "requires a MySQL state store on 127.0.0.1:3306"]
async fn cleanup_drops_fully_finished_procedures() {
    let store = fresh_store("myfab_test_cleanup").await;
    let mut persister = store.connect().await.unwrap();

    // A procedure whose every job finished but was never removed, i.e.
    // the daemon died between finish and remove.
    let done_proc = Uuid::new_v4();
    let mut done = Checkpoint::new(
        done_proc,
        Uuid::new_v4(),
        "test.done".into(),
        Args::new(),
        BTreeSet::new(),
    );
    done.schedule(&mut persister).await.unwrap();
    done.begin(&mut persister).await.unwrap();
    done.finish(&mut persister).await.unwrap();

    // A procedure still in flight must survive cleanup.
    let live_proc = Uuid::new_v4();
    let mut live = Checkpoint::new(
        live_proc,
        Uuid::new_v4(),
        "test.live".into(),
        Args::new(),
        BTreeSet::new(),
    );
    live.schedule(&mut persister).await.unwrap();
    live.begin(&mut persister).await.unwrap();

    Checkpoint::cleanup(&mut persister).await.unwrap();

    assert!(Checkpoint::fetch(&mut persister, done_proc)
        .await
        .unwrap()
        .is_empty());
    assert_eq!(
        Checkpoint::fetch(&mut persister, live_proc)
            .await
            .unwrap()
            .len(),
        1
    );

    store.teardown().await.unwrap();
}

#[tokio::test]
#[ignore = "requires a MySQL state store on 127.0.0.1:3306"]
async fn recovery_reschedules_interrupted_procedures() {
    let database = "myfab_test_recovery";
    let store = fresh_store(database).await;

    // Simulate a crash: a scheduled-and-started checkpoint with no
    // finish, left behind by a previous incarnation.
    let proc_uuid = Uuid::new_v4();
    {
        let mut persister = store.connect().await.unwrap();
        let mut interrupted = Checkpoint::new(
            proc_uuid,
            Uuid::new_v4(),
            "test.idempotent".into(),
            Args::new(),
            BTreeSet::new(),
        );
        interrupted.schedule(&mut persister).await.unwrap();
        interrupted.begin(&mut persister).await.unwrap();
    }

    // A new incarnation comes up with the action registered.
    let ctx = Context::build(test_config(database), store.clone(), Arc::new(NullSnapshotter))
        .unwrap();
    ctx.registry()
        .register(
            "test.idempotent",
            FnAction::new(|_ctx: &mut JobContext| async { Ok(Outcome::none()) }.boxed()),
            None,
        )
        .unwrap();

    let report = ctx.start().await.unwrap();
    assert_eq!(report.rescheduled, 1);
    assert_eq!(report.skipped, 0);

    // The rescheduled procedure runs to completion and removes its
    // checkpoints: nothing interrupted remains at rest.
    let mut persister = store.connect().await.unwrap();
    for _ in 0..100 {
        if Checkpoint::fetch(&mut persister, proc_uuid)
            .await
            .unwrap()
            .is_empty()
        {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }
    assert!(Checkpoint::fetch(&mut persister, proc_uuid)
        .await
        .unwrap()
        .is_empty());
    assert!(Checkpoint::unfinished(&mut persister).await.unwrap().is_empty());

    ctx.shutdown().await;
    store.teardown().await.unwrap();
}

#[tokio::test]
#[ignore = "requires a MySQL state store on 127.0.0.1:3306"]
async fn recovery_leaves_unresolvable_actions_alone() {
    let database = "myfab_test_unresolvable";
    let store = fresh_store(database).await;

    let proc_uuid = Uuid::new_v4();
    {
        let mut persister = store.connect().await.unwrap();
        let mut interrupted = Checkpoint::new(
            proc_uuid,
            Uuid::new_v4(),
            "test.gone_in_this_release".into(),
            Args::new(),
            BTreeSet::new(),
        );
        interrupted.schedule(&mut persister).await.unwrap();
        interrupted.begin(&mut persister).await.unwrap();
    }

    let ctx = Context::build(test_config(database), store.clone(), Arc::new(NullSnapshotter))
        .unwrap();
    let report = ctx.start().await.unwrap();
    assert_eq!(report.skipped, 1);

    // The checkpoint stays where it was; no data-changing recovery.
    let mut persister = store.connect().await.unwrap();
    assert_eq!(
        Checkpoint::fetch(&mut persister, proc_uuid)
            .await
            .unwrap()
            .len(),
        1
    );

    ctx.shutdown().await;
    store.teardown().await.unwrap();
}

#[tokio::test]
#[ignore = "requires a MySQL state store on 127.0.0.1:3306"]
async fn scheduled_jobs_checkpoint_before_running() {
    let database = "myfab_test_schedule";
    let store = fresh_store(database).await;

    let ctx = Context::build(test_config(database), store.clone(), Arc::new(NullSnapshotter))
        .unwrap();
    ctx.registry()
        .register(
            "test.slow",
            FnAction::new(|_ctx: &mut JobContext| {
                async {
                    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
                    Ok(Outcome::none())
                }
                .boxed()
            }),
            None,
        )
        .unwrap();
    ctx.executor().start(&ctx).unwrap();

    let procedure = ctx
        .executor()
        .enqueue_procedure(
            JobSpec::named("test.slow", "Slow job.", Args::new()),
            BTreeSet::new(),
        )
        .await
        .unwrap();

    // The checkpoint row exists while the job is still running.
    let mut persister = store.connect().await.unwrap();
    let rows = Checkpoint::fetch(&mut persister, procedure.uuid()).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].action_fqn, "test.slow");

    ctx.executor().wait_for_procedure(&procedure).await.unwrap();
    ctx.shutdown().await;
    store.teardown().await.unwrap();
}
