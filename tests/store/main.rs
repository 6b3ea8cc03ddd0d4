mod support;

use estate_rust::{
    BatchPhase, Listener, Middleware, SetOpts, Store, StoreError, Update, Value,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use support::{user_store, Recorder};
use tokio::sync::oneshot;

// =============================================================================
// Setters and batching
// =============================================================================

#[tokio::test]
async fn back_to_back_setters_land_in_one_batch() {
    let store = user_store();
    let names = Recorder::new();
    store.subscribe("user", "name", names.listener()).unwrap();

    store
        .set_value("user", "name", Update::value("Jane"))
        .unwrap();
    store
        .set_value(
            "user",
            "age",
            Update::with(|age| age.as_i64().unwrap_or(0) + 1),
        )
        .unwrap();
    store.settled().await;

    assert_eq!(*store.get("user", "name").unwrap(), Value::from("Jane"));
    assert_eq!(*store.get("user", "age").unwrap(), Value::from(31));
    let calls = names.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].slice, "user");
    assert_eq!(calls[0].key, "name");
}

#[tokio::test]
async fn updates_to_one_key_compose_in_submission_order() {
    let store = user_store();
    for suffix in ["a", "b", "c"] {
        store
            .set_value(
                "user",
                "name",
                Update::with(move |name| format!("{}{}", name.as_str().unwrap_or(""), suffix)),
            )
            .unwrap();
    }
    store.settled().await;

    assert_eq!(*store.get("user", "name").unwrap(), Value::from("Johnabc"));
}

#[tokio::test]
async fn queued_values_are_not_visible_before_commit() {
    let store = user_store();
    store
        .set_value("user", "name", Update::value("Jane"))
        .unwrap();

    assert_eq!(*store.get("user", "name").unwrap(), Value::from("John"));
    assert_eq!(store.pending(), 1);
    assert_eq!(store.phase(), BatchPhase::Draining);

    store.settled().await;
    assert_eq!(*store.get("user", "name").unwrap(), Value::from("Jane"));
    assert_eq!(store.phase(), BatchPhase::Idle);
    assert_eq!(store.pending(), 0);
}

#[tokio::test]
async fn async_updater_holds_back_later_units() {
    let store = user_store();
    let names = Recorder::new();
    store.subscribe("user", "name", names.listener()).unwrap();

    let (release, released) = oneshot::channel::<()>();
    store
        .set_value(
            "user",
            "name",
            Update::with_async(|name| async move {
                released.await.map_err(|err| err.to_string())?;
                Ok::<_, String>(format!("{}!", name.as_str().unwrap_or("")))
            }),
        )
        .unwrap();
    store
        .set_value(
            "user",
            "name",
            Update::with(|name| format!("{}?", name.as_str().unwrap_or(""))),
        )
        .unwrap();

    for _ in 0..5 {
        tokio::task::yield_now().await;
    }
    assert_eq!(store.phase(), BatchPhase::Draining);
    assert_eq!(*store.get("user", "name").unwrap(), Value::from("John"));
    assert_eq!(names.count(), 0);

    release.send(()).unwrap();
    store.settled().await;

    assert_eq!(*store.get("user", "name").unwrap(), Value::from("John!?"));
    assert_eq!(names.count(), 1);
}

#[tokio::test]
async fn setter_called_while_updater_is_suspended_joins_the_batch() {
    let store = user_store();
    let ages = Recorder::new();
    store.subscribe("user", "age", ages.listener()).unwrap();

    let (release, released) = oneshot::channel::<()>();
    store
        .set_value(
            "user",
            "age",
            Update::with_async(|age| async move {
                released.await.map_err(|err| err.to_string())?;
                Ok::<_, String>(age.as_i64().unwrap_or(0) + 10)
            }),
        )
        .unwrap();

    for _ in 0..5 {
        tokio::task::yield_now().await;
    }
    assert_eq!(store.phase(), BatchPhase::Draining);
    assert_eq!(store.pending(), 0);

    store
        .set_value("user", "age", Update::with(|age| age.as_i64().unwrap_or(0) * 2))
        .unwrap();
    assert_eq!(store.pending(), 1);

    release.send(()).unwrap();
    store.settled().await;

    assert_eq!(*store.get("user", "age").unwrap(), Value::from(80));
    assert_eq!(ages.count(), 1);
}

#[tokio::test]
async fn failing_updater_is_skipped_and_batch_continues() {
    let store = user_store();
    let ages = Recorder::new();
    store.subscribe("user", "age", ages.listener()).unwrap();

    store
        .set_value(
            "user",
            "age",
            Update::try_with(|_| Err::<Value, _>("no age today")),
        )
        .unwrap();
    store
        .set_value("user", "name", Update::value("Jane"))
        .unwrap();
    store.settled().await;

    assert_eq!(*store.get("user", "age").unwrap(), Value::from(30));
    assert_eq!(*store.get("user", "name").unwrap(), Value::from("Jane"));
    assert_eq!(ages.count(), 0);
}

#[tokio::test]
async fn panicking_updater_does_not_stall_the_queue() {
    let store = user_store();
    store
        .set_value(
            "user",
            "age",
            Update::with(|_| -> Value { panic!("updater exploded") }),
        )
        .unwrap();
    store
        .set_value("user", "age", Update::with(|age| age.as_i64().unwrap_or(0) * 2))
        .unwrap();
    store.settled().await;

    assert_eq!(*store.get("user", "age").unwrap(), Value::from(60));
}

#[tokio::test]
async fn set_slice_queues_every_key_or_none() {
    let store = user_store();

    let err = store
        .set_slice(
            "user",
            [
                ("name", Update::value("Jane")),
                ("nickname", Update::value("JJ")),
            ],
        )
        .unwrap_err();
    assert_eq!(
        err,
        StoreError::UnknownKey {
            slice: "user".into(),
            key: "nickname".into()
        }
    );
    assert_eq!(store.pending(), 0);

    store
        .set_slice(
            "user",
            [("name", Update::value("Jane")), ("age", Update::value(40))],
        )
        .unwrap();
    store.settled().await;
    assert_eq!(*store.get("user", "name").unwrap(), Value::from("Jane"));
    assert_eq!(*store.get("user", "age").unwrap(), Value::from(40));
}

#[tokio::test]
async fn reset_restores_initial_values() {
    let store = user_store();
    store
        .set_slice(
            "user",
            [("name", Update::value("Jane")), ("age", Update::value(40))],
        )
        .unwrap();
    store
        .set_value("settings", "theme", Update::value("dark"))
        .unwrap();
    store.settled().await;

    store.reset("user").unwrap();
    store.settled().await;
    assert_eq!(*store.get("user", "name").unwrap(), Value::from("John"));
    assert_eq!(*store.get("settings", "theme").unwrap(), Value::from("dark"));

    store.reset_all().unwrap();
    store.settled().await;
    assert_eq!(store.get_all().unwrap(), *store.initial());
}

// =============================================================================
// Configuration errors
// =============================================================================

#[tokio::test]
async fn unknown_slice_is_rejected_synchronously() {
    let store = user_store();
    let err = store
        .set_value("ghost", "x", Update::value(1))
        .unwrap_err();

    assert!(err.is_configuration());
    assert_eq!(
        err,
        StoreError::UnknownSlice {
            slice: "ghost".into()
        }
    );
    assert_eq!(err.to_string(), "the slice ghost does not exist in the store");
    assert_eq!(store.pending(), 0);
}

#[tokio::test]
async fn unknown_keys_are_rejected_everywhere() {
    let store = user_store();
    let unknown = StoreError::UnknownKey {
        slice: "user".into(),
        key: "email".into(),
    };

    assert_eq!(store.get("user", "email").unwrap_err(), unknown);
    assert_eq!(
        store
            .set_value("user", "email", Update::value("a@b.c"))
            .unwrap_err(),
        unknown
    );
    assert_eq!(
        store
            .subscribe("user", "email", Listener::new(|_| {}))
            .unwrap_err(),
        unknown
    );
    assert_eq!(
        store
            .register_middleware("user", "email", Middleware::value(1))
            .unwrap_err(),
        unknown
    );
    assert!(!store.contains("user", "email"));
}

#[tokio::test]
async fn slices_and_keys_are_fixed_at_build() {
    let store = user_store();
    assert_eq!(store.slices(), vec!["settings", "user"]);
    assert_eq!(store.keys("user").unwrap(), vec!["age", "name"]);
    assert!(store.keys("ghost").is_err());
}

// =============================================================================
// Listeners
// =============================================================================

#[tokio::test]
async fn unchanged_value_notifies_only_when_forced() {
    let store = user_store();
    let names = Recorder::new();
    store.subscribe("user", "name", names.listener()).unwrap();

    store
        .set_value("user", "name", Update::value("John"))
        .unwrap();
    store.settled().await;
    assert_eq!(names.count(), 0);

    store
        .set_value_with("user", "name", Update::value("John"), SetOpts::force())
        .unwrap();
    store.settled().await;
    assert_eq!(names.count(), 1);
}

#[tokio::test]
async fn value_changed_and_changed_back_is_not_notified() {
    let store = user_store();
    let names = Recorder::new();
    store.subscribe("user", "name", names.listener()).unwrap();

    store
        .set_value("user", "name", Update::value("Jane"))
        .unwrap();
    store
        .set_value("user", "name", Update::value("John"))
        .unwrap();
    store.settled().await;

    assert_eq!(names.count(), 0);
}

#[tokio::test]
async fn comparator_decides_what_counts_as_a_change() {
    let store = user_store();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    store
        .subscribe(
            "user",
            "name",
            Listener::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .compare(|old, new| {
                old.as_str().map(str::to_lowercase) == new.as_str().map(str::to_lowercase)
            }),
        )
        .unwrap();

    store
        .set_value("user", "name", Update::value("JOHN"))
        .unwrap();
    store.settled().await;
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    store
        .set_value("user", "name", Update::value("Jane"))
        .unwrap();
    store.settled().await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn once_listener_fires_a_single_time() {
    let store = user_store();
    let names = Recorder::new();
    let subscription = store
        .subscribe("user", "name", names.listener().once())
        .unwrap();

    for name in ["Jane", "Jill", "Joan"] {
        store
            .set_value("user", "name", Update::value(name))
            .unwrap();
        store.settled().await;
    }

    assert_eq!(names.count(), 1);
    assert!(!subscription.is_active());
    assert_eq!(store.listener_count(), 0);
}

#[tokio::test]
async fn unsubscribing_before_commit_skips_the_batch() {
    let store = user_store();
    let names = Recorder::new();
    let subscription = store
        .subscribe("user", "name", names.listener())
        .unwrap();

    store
        .set_value("user", "name", Update::value("Jane"))
        .unwrap();
    assert!(subscription.unsubscribe());
    store.settled().await;

    assert_eq!(names.count(), 0);
}

#[tokio::test]
async fn subscribing_with_same_id_replaces_listener() {
    let store = user_store();
    let first = Recorder::new();
    let second = Recorder::new();
    store
        .subscribe("user", "name", first.listener().id("header"))
        .unwrap();
    let subscription = store
        .subscribe("user", "name", second.listener().id("header"))
        .unwrap();

    store
        .set_value("user", "name", Update::value("Jane"))
        .unwrap();
    store.settled().await;

    assert_eq!(first.count(), 0);
    assert_eq!(second.count(), 1);
    assert_eq!(store.listener_count(), 1);
    assert!(store.unsubscribe(subscription.id()));
}

#[tokio::test]
async fn slice_subscription_fires_once_per_changed_key() {
    let store = user_store();
    let user = Recorder::new();
    store.subscribe_slice("user", user.listener()).unwrap();

    store
        .set_slice(
            "user",
            [("name", Update::value("Jane")), ("age", Update::value(31))],
        )
        .unwrap();
    store
        .set_value("settings", "theme", Update::value("dark"))
        .unwrap();
    store.settled().await;

    let mut keys = user.keys();
    keys.sort();
    assert_eq!(keys, vec!["age", "name"]);
}

#[tokio::test]
async fn every_invocation_gets_a_fresh_update_id() {
    let store = user_store();
    let names = Recorder::new();
    store.subscribe("user", "name", names.listener()).unwrap();
    store.subscribe("user", "name", names.listener()).unwrap();

    store
        .set_value("user", "name", Update::value("Jane"))
        .unwrap();
    store.settled().await;

    let calls = names.calls();
    assert_eq!(calls.len(), 2);
    assert_ne!(calls[0].update_id, calls[1].update_id);
}

#[tokio::test]
async fn panicking_listener_does_not_block_others() {
    let store = user_store();
    let names = Recorder::new();
    store
        .subscribe("user", "name", Listener::new(|_| panic!("listener exploded")))
        .unwrap();
    store.subscribe("user", "name", names.listener()).unwrap();

    store
        .set_value("user", "name", Update::value("Jane"))
        .unwrap();
    store.settled().await;

    assert_eq!(names.count(), 1);
}

#[tokio::test]
async fn listener_can_queue_follow_up_updates() {
    let store = user_store();
    let weak = store.downgrade();
    store
        .subscribe(
            "user",
            "name",
            Listener::new(move |_| {
                if let Some(store) = weak.upgrade() {
                    store
                        .set_value("user", "age", Update::with(|age| age.as_i64().unwrap_or(0) + 1))
                        .unwrap();
                }
            }),
        )
        .unwrap();

    store
        .set_value("user", "name", Update::value("Jane"))
        .unwrap();
    store.settled().await;

    assert_eq!(*store.get("user", "age").unwrap(), Value::from(31));
}

#[tokio::test]
async fn listener_reads_committed_value() {
    let store = user_store();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let weak = store.downgrade();
    let sink = Arc::clone(&seen);
    store
        .subscribe(
            "user",
            "name",
            Listener::new(move |args| {
                let store = weak.upgrade().unwrap();
                let value = store.get(&args.slice, &args.key).unwrap();
                sink.lock().unwrap().push(Value::clone(&value));
            }),
        )
        .unwrap();

    store
        .set_value("user", "name", Update::value("Jane"))
        .unwrap();
    store
        .set_value("user", "name", Update::value("Jill"))
        .unwrap();
    store.settled().await;

    assert_eq!(*seen.lock().unwrap(), vec![Value::from("Jill")]);
}

// =============================================================================
// Middleware
// =============================================================================

#[tokio::test]
async fn middleware_transforms_committed_value() {
    let store = user_store();
    store
        .register_middleware(
            "user",
            "name",
            Middleware::transform(|args| {
                Value::from(args.value.as_str().unwrap_or("").to_uppercase())
            }),
        )
        .unwrap();

    store
        .set_value("user", "name", Update::value("jane"))
        .unwrap();
    store.settled().await;

    assert_eq!(*store.get("user", "name").unwrap(), Value::from("JANE"));
}

#[tokio::test]
async fn middleware_sees_rest_of_store() {
    let store = Store::builder()
        .slice("limits", [("max_age", 50)])
        .slice("user", [("age", 30)])
        .middleware(
            "user",
            "age",
            Middleware::transform(|args| {
                let max = args
                    .store
                    .get("limits", "max_age")
                    .and_then(Value::as_i64)
                    .unwrap_or(i64::MAX);
                Value::from(args.value.as_i64().unwrap_or(0).min(max))
            }),
        )
        .build()
        .unwrap();

    store
        .set_value("user", "age", Update::value(120))
        .unwrap();
    store.settled().await;

    assert_eq!(*store.get("user", "age").unwrap(), Value::from(50));
}

#[tokio::test]
async fn failing_middleware_keeps_incoming_value() {
    let store = user_store();
    store
        .register_middleware(
            "user",
            "name",
            Middleware::try_transform(|_| Err::<Value, _>("rejected")),
        )
        .unwrap();

    store
        .set_value("user", "name", Update::value("Jane"))
        .unwrap();
    store.settled().await;

    assert_eq!(*store.get("user", "name").unwrap(), Value::from("Jane"));
}

#[tokio::test]
async fn constant_middleware_pins_value() {
    let store = user_store();
    let themes = Recorder::new();
    store
        .subscribe("settings", "theme", themes.listener())
        .unwrap();
    store
        .register_middleware("settings", "theme", Middleware::value("light"))
        .unwrap();

    store
        .set_value("settings", "theme", Update::value("dark"))
        .unwrap();
    store.settled().await;

    assert_eq!(*store.get("settings", "theme").unwrap(), Value::from("light"));
    assert_eq!(themes.count(), 0);
}

// =============================================================================
// Values
// =============================================================================

#[tokio::test]
async fn get_clone_is_detached_from_store() {
    let store = Store::builder()
        .slice("cart", [("items", Value::from(vec!["apple"]))])
        .build()
        .unwrap();

    let mut items = store.get_clone("cart", "items").unwrap();
    if let Value::Array(items) = &mut items {
        items.push(Value::from("pear"));
    }

    assert_eq!(
        *store.get("cart", "items").unwrap(),
        Value::from(vec!["apple"])
    );
    assert_eq!(items.len(), 2);
}

#[tokio::test]
async fn structured_values_compare_deeply() {
    let store = Store::builder()
        .slice(
            "user",
            [("tags", Value::set(["admin", "ops"]))],
        )
        .build()
        .unwrap();
    let tags = Recorder::new();
    store.subscribe("user", "tags", tags.listener()).unwrap();

    store
        .set_value("user", "tags", Update::value(Value::set(["admin", "ops"])))
        .unwrap();
    store.settled().await;
    assert_eq!(tags.count(), 0);

    store
        .set_value(
            "user",
            "tags",
            Update::with(|tags| match tags {
                Value::Set(mut members) => {
                    members.push(Value::from("dev"));
                    Value::Set(members)
                }
                other => other,
            }),
        )
        .unwrap();
    store.settled().await;
    assert_eq!(tags.count(), 1);
    assert!(store
        .get("user", "tags")
        .unwrap()
        .contains(&Value::from("dev")));
}
