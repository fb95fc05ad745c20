use anyhow::anyhow;
use componentdb::{
    ComponentSchema, EngineContext, Entity, EventKind, FieldKind, HookHandler, HookOptions, LifecycleEvent,
};
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;

async fn setup() -> Arc<EngineContext> {
    let ctx = EngineContext::in_memory();
    ctx.register_component(ComponentSchema::new("Health").field("hp", FieldKind::Number))
        .await
        .unwrap();
    ctx.register_component(ComponentSchema::new("Position").field("x", FieldKind::Number))
        .await
        .unwrap();
    ctx
}

#[tokio::test]
async fn test_hooks_run_by_descending_priority() {
    let ctx = setup().await;
    let order = Arc::new(Mutex::new(Vec::new()));
    for priority in [1, 2, 0] {
        let sink = Arc::clone(&order);
        ctx.hooks()
            .register_entity_hook(
                EventKind::EntityCreated,
                HookHandler::sync(move |_| {
                    sink.lock().unwrap().push(priority);
                    Ok(())
                }),
                HookOptions::new().priority(priority),
            )
            .unwrap();
    }

    let mut entity = Entity::new(&ctx);
    entity.add("Health", json!({"hp": 10})).unwrap();
    entity.save().await.unwrap();

    assert_eq!(*order.lock().unwrap(), vec![2, 1, 0]);
}

#[tokio::test]
async fn test_failing_hook_does_not_stop_others_or_the_save() {
    let ctx = setup().await;
    let ran = Arc::new(Mutex::new(false));
    ctx.hooks()
        .register_entity_hook(
            EventKind::EntityCreated,
            HookHandler::sync(|_| Err(anyhow!("boom"))),
            HookOptions::new().priority(10).name("broken"),
        )
        .unwrap();
    ctx.hooks()
        .register_entity_hook(
            EventKind::EntityCreated,
            HookHandler::sync(|_| panic!("handler panicked")),
            HookOptions::new().priority(5),
        )
        .unwrap();
    let sink = Arc::clone(&ran);
    ctx.hooks()
        .register_entity_hook(
            EventKind::EntityCreated,
            HookHandler::sync(move |_| {
                *sink.lock().unwrap() = true;
                Ok(())
            }),
            HookOptions::new(),
        )
        .unwrap();

    let mut entity = Entity::new(&ctx);
    entity.add("Health", json!({"hp": 10})).unwrap();
    assert!(entity.save().await.unwrap());
    assert!(*ran.lock().unwrap());

    let metrics = ctx.hooks().get_metrics(EventKind::EntityCreated);
    assert_eq!(metrics.executions, 3);
    assert_eq!(metrics.errors, 2);
}

#[tokio::test]
async fn test_component_hook_scoped_to_one_component() {
    let ctx = setup().await;
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    ctx.hooks()
        .register_component_hook(
            EventKind::ComponentAdded,
            HookHandler::sync(move |event: &LifecycleEvent| {
                sink.lock().unwrap().push(event.component().unwrap_or_default().to_string());
                Ok(())
            }),
            HookOptions::new().component("Position"),
        )
        .unwrap();

    let mut entity = Entity::new(&ctx);
    entity.add("Health", json!({"hp": 10})).unwrap();
    entity.add("Position", json!({"x": 3})).unwrap();

    assert_eq!(*seen.lock().unwrap(), vec!["Position".to_string()]);
}

#[tokio::test]
async fn test_filter_selects_events() {
    let ctx = setup().await;
    let count = Arc::new(Mutex::new(0));
    let sink = Arc::clone(&count);
    ctx.hooks()
        .register_entity_hook(
            EventKind::EntityDeleted,
            HookHandler::sync(move |_| {
                *sink.lock().unwrap() += 1;
                Ok(())
            }),
            HookOptions::new().filter(|event| matches!(event, LifecycleEvent::EntityDeleted { hard: true, .. })),
        )
        .unwrap();

    let mut soft = Entity::new(&ctx);
    soft.add("Health", json!({"hp": 1})).unwrap();
    soft.save().await.unwrap();
    soft.delete(false).await.unwrap();

    let mut hard = Entity::new(&ctx);
    hard.add("Health", json!({"hp": 1})).unwrap();
    hard.save().await.unwrap();
    hard.delete(true).await.unwrap();

    assert_eq!(*count.lock().unwrap(), 1);
}

#[tokio::test]
async fn test_async_hook_receives_event() {
    let ctx = setup().await;
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    ctx.hooks()
        .register_entity_hook(
            EventKind::EntityCreated,
            HookHandler::from_async(move |event: LifecycleEvent| {
                let tx = tx.clone();
                async move {
                    tx.send(*event.entity_id()).map_err(|e| anyhow!(e.to_string()))?;
                    Ok(())
                }
            }),
            HookOptions::new().is_async(true),
        )
        .unwrap();

    let mut entity = Entity::new(&ctx);
    entity.add("Health", json!({"hp": 10})).unwrap();
    entity.save().await.unwrap();

    let received = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.unwrap();
    assert_eq!(received, Some(entity.id()));
}

#[tokio::test]
async fn test_slow_async_hook_times_out_without_failing_save() {
    let ctx = setup().await;
    ctx.hooks()
        .register_entity_hook(
            EventKind::EntityCreated,
            HookHandler::from_async(|_| async {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok(())
            }),
            HookOptions::new().is_async(true).timeout(Duration::from_millis(10)),
        )
        .unwrap();

    let mut entity = Entity::new(&ctx);
    entity.add("Health", json!({"hp": 10})).unwrap();
    assert!(entity.save().await.unwrap());
    assert!(entity.is_persisted());

    assert_eq!(ctx.hooks().get_metrics(EventKind::EntityCreated).timeouts, 1);
}

#[tokio::test]
async fn test_removed_hook_no_longer_fires() {
    let ctx = setup().await;
    let count = Arc::new(Mutex::new(0));
    let sink = Arc::clone(&count);
    let id = ctx
        .hooks()
        .register_component_hook(
            EventKind::ComponentUpdated,
            HookHandler::sync(move |_| {
                *sink.lock().unwrap() += 1;
                Ok(())
            }),
            HookOptions::new(),
        )
        .unwrap();

    let mut entity = Entity::new(&ctx);
    entity.add("Health", json!({"hp": 10})).unwrap();
    entity.set("Health", json!({"hp": 9})).unwrap();
    assert!(ctx.hooks().remove_hook(id).unwrap());
    entity.set("Health", json!({"hp": 8})).unwrap();

    assert_eq!(*count.lock().unwrap(), 1);
    assert_eq!(ctx.hooks().get_hook_count(Some(EventKind::ComponentUpdated)).unwrap(), 0);
}

#[tokio::test]
async fn test_wrong_hook_category_is_rejected() {
    let ctx = setup().await;
    let err = ctx.hooks().register_entity_hook(
        EventKind::ComponentAdded,
        HookHandler::sync(|_| Ok(())),
        HookOptions::new(),
    );
    assert!(err.is_err());
}
