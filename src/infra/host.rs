//! Local stand-ins for the host's client list and worker registration.
//!
//! Used by the CLI, where no real windows exist, and by tests that need to
//! observe what the engine asked the host to do.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use tracing::info;

use crate::runtime::{ClientInfo, Clients, Notification, Registration, RuntimeError};

use super::lock::mutex_lock;

const SOURCE: &str = "infra::host";

#[derive(Default)]
pub struct LocalClients {
    clients: Mutex<Vec<ClientInfo>>,
    claims: AtomicUsize,
    navigations: Mutex<Vec<(String, String)>>,
    focused: Mutex<Vec<String>>,
    opened: Mutex<Vec<String>>,
}

impl LocalClients {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_clients(clients: Vec<ClientInfo>) -> Self {
        Self {
            clients: Mutex::new(clients),
            ..Self::default()
        }
    }

    pub fn claim_count(&self) -> usize {
        self.claims.load(Ordering::SeqCst)
    }

    /// `(client_id, url)` pairs in the order they were requested.
    pub fn navigations(&self) -> Vec<(String, String)> {
        mutex_lock(&self.navigations, SOURCE, "navigations").clone()
    }

    pub fn focused(&self) -> Vec<String> {
        mutex_lock(&self.focused, SOURCE, "focused").clone()
    }

    pub fn opened_windows(&self) -> Vec<String> {
        mutex_lock(&self.opened, SOURCE, "opened_windows").clone()
    }
}

#[async_trait]
impl Clients for LocalClients {
    async fn list(&self) -> Result<Vec<ClientInfo>, RuntimeError> {
        Ok(mutex_lock(&self.clients, SOURCE, "list").clone())
    }

    async fn claim(&self) -> Result<(), RuntimeError> {
        self.claims.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn navigate(&self, client_id: &str, url: &str) -> Result<(), RuntimeError> {
        let known = mutex_lock(&self.clients, SOURCE, "navigate")
            .iter()
            .any(|client| client.id == client_id);
        if !known {
            return Err(RuntimeError::Client(format!("unknown client `{client_id}`")));
        }
        mutex_lock(&self.navigations, SOURCE, "navigate")
            .push((client_id.to_string(), url.to_string()));
        Ok(())
    }

    async fn focus(&self, client_id: &str) -> Result<(), RuntimeError> {
        let mut clients = mutex_lock(&self.clients, SOURCE, "focus");
        for client in clients.iter_mut() {
            client.focused = client.id == client_id;
        }
        mutex_lock(&self.focused, SOURCE, "focus").push(client_id.to_string());
        Ok(())
    }

    async fn open_window(&self, url: &str) -> Result<(), RuntimeError> {
        mutex_lock(&self.opened, SOURCE, "open_window").push(url.to_string());
        Ok(())
    }
}

pub struct LocalRegistration {
    registered: AtomicBool,
    skip_waiting_calls: AtomicUsize,
    unregister_calls: AtomicUsize,
    notifications: Mutex<Vec<Notification>>,
}

impl LocalRegistration {
    pub fn new() -> Self {
        Self {
            registered: AtomicBool::new(true),
            skip_waiting_calls: AtomicUsize::new(0),
            unregister_calls: AtomicUsize::new(0),
            notifications: Mutex::new(Vec::new()),
        }
    }

    pub fn is_registered(&self) -> bool {
        self.registered.load(Ordering::SeqCst)
    }

    pub fn skip_waiting_calls(&self) -> usize {
        self.skip_waiting_calls.load(Ordering::SeqCst)
    }

    pub fn unregister_calls(&self) -> usize {
        self.unregister_calls.load(Ordering::SeqCst)
    }

    pub fn notifications(&self) -> Vec<Notification> {
        mutex_lock(&self.notifications, SOURCE, "notifications").clone()
    }
}

impl Default for LocalRegistration {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Registration for LocalRegistration {
    async fn skip_waiting(&self) -> Result<(), RuntimeError> {
        self.skip_waiting_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn unregister(&self) -> Result<bool, RuntimeError> {
        self.unregister_calls.fetch_add(1, Ordering::SeqCst);
        let was_registered = self.registered.swap(false, Ordering::SeqCst);
        info!(was_registered, "worker unregistered");
        Ok(was_registered)
    }

    async fn show_notification(&self, notification: &Notification) -> Result<(), RuntimeError> {
        mutex_lock(&self.notifications, SOURCE, "show_notification").push(notification.clone());
        Ok(())
    }
}
