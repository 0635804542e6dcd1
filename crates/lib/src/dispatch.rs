//! Dispatch engine: classifies inbound events and decides the outbound actions.
//!
//! Every inbound message is normalized into a closed tagged union (free text or
//! menu selection), resolved against the menu most recently sent to that contact,
//! and answered with zero or more outbound intents. The engine owns the per-contact
//! state (greeted flag, last menu sent) and nothing else; it never talks to the
//! transport directly, so the whole decision surface is testable without a network.

use crate::catalog::{MenuCatalog, MenuOption, ReplyAction};
use crate::channels::InboundMessage;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Keyword that re-sends the menu to an already-greeted contact. Case-insensitive, trimmed.
const MENU_TRIGGER: &str = "menu";

const UNKNOWN_OPTION_TEXT: &str =
    "Unknown option. Please try again, or send \"menu\" to see the available options.";
const FALLBACK_HELP_TEXT: &str =
    "Sorry, I didn't catch that. Send \"menu\" to see the available options.";

/// Normalized inbound event, after the transport's raw shape has been mapped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    /// Plain message with no structured selection payload.
    FreeText { from: String, body: String },
    /// The contact chose a specific option (structured reply).
    MenuSelection { from: String, option_id: String },
}

/// Outbound intent. The transport collaborator turns these into native messages;
/// the engine never touches serialization or rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundAction {
    SendText { to: String, text: String },
    SendMenu { to: String, menu_id: String },
}

/// Per-contact state, created on first inbound event and kept for the process lifetime.
#[derive(Debug, Clone, Default)]
struct ContactState {
    greeted: bool,
    /// Id of the menu most recently sent to this contact. Selections resolve
    /// against this; it is not cleared on resolution, so repeating a valid
    /// selection yields the same reply again.
    last_menu: Option<String>,
}

/// Which menu each contact gets: the admin address may route to a separate menu.
#[derive(Debug, Clone)]
pub struct MenuRouting {
    pub default_menu: String,
    /// When set together with `admin_address`, the admin is greeted with this
    /// menu instead of the default flow.
    pub admin_menu: Option<String>,
    pub admin_address: Option<String>,
}

impl MenuRouting {
    fn menu_for(&self, address: &str) -> &str {
        if self.is_admin(address) {
            if let Some(ref admin_menu) = self.admin_menu {
                return admin_menu;
            }
        }
        &self.default_menu
    }

    fn is_admin(&self, address: &str) -> bool {
        self.admin_address.as_deref() == Some(address)
    }
}

/// The menu-selection state machine. Catalog and routing are fixed at
/// construction; the contact map is the only mutable state.
pub struct DispatchEngine {
    catalog: Arc<MenuCatalog>,
    routing: MenuRouting,
    contacts: RwLock<HashMap<String, ContactState>>,
}

/// Map a raw transport message into a normalized event. A present, non-empty
/// structured payload wins; anything else (including shapes we do not recognize)
/// degrades to free text with the raw body. Never fails.
pub fn normalize(msg: &InboundMessage) -> InboundEvent {
    match msg.selected_option_id.as_deref().map(str::trim) {
        Some(id) if !id.is_empty() => InboundEvent::MenuSelection {
            from: msg.conversation_id.clone(),
            option_id: id.to_string(),
        },
        _ => InboundEvent::FreeText {
            from: msg.conversation_id.clone(),
            body: msg.text.clone(),
        },
    }
}

impl DispatchEngine {
    pub fn new(catalog: Arc<MenuCatalog>, routing: MenuRouting) -> Self {
        Self {
            catalog,
            routing,
            contacts: RwLock::new(HashMap::new()),
        }
    }

    /// Process one inbound event and return the actions to perform. Contact
    /// state is read and mutated under one lock, so a contact's events must be
    /// fed in arrival order (the service's single inbound loop guarantees this).
    pub async fn on_event(&self, event: InboundEvent) -> Vec<OutboundAction> {
        match event {
            InboundEvent::MenuSelection { from, option_id } => {
                self.on_selection(&from, &option_id).await
            }
            InboundEvent::FreeText { from, body } => self.on_free_text(&from, &body).await,
        }
    }

    /// Explicit bootstrap, run once after the transport signals readiness: send
    /// the admin their menu so a live deployment is immediately visible.
    pub async fn startup_actions(&self) -> Vec<OutboundAction> {
        let Some(admin) = self.routing.admin_address.clone() else {
            log::debug!("dispatch: no admin address configured, skipping startup notice");
            return Vec::new();
        };
        let menu_id = self.routing.menu_for(&admin).to_string();
        let mut contacts = self.contacts.write().await;
        let state = contacts.entry(admin.clone()).or_default();
        state.greeted = true;
        state.last_menu = Some(menu_id.clone());
        vec![OutboundAction::SendMenu { to: admin, menu_id }]
    }

    async fn on_selection(&self, from: &str, option_id: &str) -> Vec<OutboundAction> {
        let contacts = self.contacts.read().await;
        let active_menu = contacts
            .get(from)
            .and_then(|s| s.last_menu.clone())
            .unwrap_or_else(|| self.routing.menu_for(from).to_string());
        drop(contacts);

        match self.catalog.resolve_option(&active_menu, option_id) {
            Some(option) => self.execute(from, option),
            None => {
                log::debug!(
                    "dispatch: unresolved option {:?} from {} (menu {})",
                    option_id,
                    from,
                    active_menu
                );
                vec![OutboundAction::SendText {
                    to: from.to_string(),
                    text: UNKNOWN_OPTION_TEXT.to_string(),
                }]
            }
        }
    }

    async fn on_free_text(&self, from: &str, body: &str) -> Vec<OutboundAction> {
        let body = body.trim();

        let mut contacts = self.contacts.write().await;
        let state = contacts.entry(from.to_string()).or_default();
        let active_menu = state
            .last_menu
            .clone()
            .unwrap_or_else(|| self.routing.menu_for(from).to_string());

        // Free text that exactly matches an option label is a degraded selection.
        let label_match = self
            .catalog
            .resolve_option(&active_menu, body)
            .filter(|o| o.label.eq_ignore_ascii_case(body))
            .cloned();
        if let Some(option) = label_match {
            drop(contacts);
            return self.execute(from, &option);
        }

        if !state.greeted || body.eq_ignore_ascii_case(MENU_TRIGGER) {
            let menu_id = self.routing.menu_for(from).to_string();
            state.greeted = true;
            state.last_menu = Some(menu_id.clone());
            return vec![OutboundAction::SendMenu {
                to: from.to_string(),
                menu_id,
            }];
        }

        vec![OutboundAction::SendText {
            to: from.to_string(),
            text: FALLBACK_HELP_TEXT.to_string(),
        }]
    }

    /// Expand an option's reply action into outbound intents. The user-facing
    /// reply and the admin notification are independent siblings.
    fn execute(&self, from: &str, option: &MenuOption) -> Vec<OutboundAction> {
        match &option.action {
            ReplyAction::StaticReply(text) => vec![OutboundAction::SendText {
                to: from.to_string(),
                text: text.clone(),
            }],
            ReplyAction::NotifyAdminAndReply {
                user_text,
                admin_template,
            } => {
                let mut actions = vec![OutboundAction::SendText {
                    to: from.to_string(),
                    text: user_text.clone(),
                }];
                match self.routing.admin_address {
                    Some(ref admin) => actions.push(OutboundAction::SendText {
                        to: admin.clone(),
                        text: admin_template.replace("{from}", from),
                    }),
                    None => log::warn!(
                        "dispatch: option {} wants to notify admin but no admin address is configured",
                        option.option_id
                    ),
                }
                actions
            }
        }
    }
}
