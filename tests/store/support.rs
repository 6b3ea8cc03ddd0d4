#![allow(dead_code)]

use estate_rust::{Listener, ListenerArgs, Store, Value};
use std::sync::{Arc, Mutex};

/// `{ user: { name: "John", age: 30 }, settings: { theme: "light" } }`
pub fn user_store() -> Store {
    Store::builder()
        .slice(
            "user",
            [("name", Value::from("John")), ("age", Value::from(30))],
        )
        .slice("settings", [("theme", "light")])
        .build()
        .unwrap()
}

/// Listener that records every invocation.
#[derive(Clone, Default)]
pub struct Recorder {
    calls: Arc<Mutex<Vec<ListenerArgs>>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn listener(&self) -> Listener {
        let calls = Arc::clone(&self.calls);
        Listener::new(move |args| calls.lock().unwrap().push(args.clone()))
    }

    pub fn calls(&self) -> Vec<ListenerArgs> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn keys(&self) -> Vec<String> {
        self.calls().into_iter().map(|args| args.key).collect()
    }
}
