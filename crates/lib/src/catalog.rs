//! Menu catalog: immutable registry of menu definitions.
//!
//! Menus are built once at process start and only ever read. Option resolution
//! matches by stable option id first, then falls back to a case-insensitive
//! label match so transports that degrade button replies into plain text keep working.

use std::collections::HashMap;

/// Inline-button rendering caps out at this many options; larger menus use list rendering.
pub const MAX_BUTTON_OPTIONS: usize = 3;

/// What selecting an option does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyAction {
    /// Reply to the contact with fixed text.
    StaticReply(String),
    /// Reply to the contact and notify the admin. `admin_template` may contain
    /// `{from}`, replaced with the contact's address when the notification is built.
    NotifyAdminAndReply {
        user_text: String,
        admin_template: String,
    },
}

/// A single selectable choice within a menu.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MenuOption {
    /// Stable id used to match selection events. Unique within its menu.
    pub option_id: String,
    /// User-visible label; also accepted as a free-text match fallback.
    pub label: String,
    pub action: ReplyAction,
}

impl MenuOption {
    pub fn reply(option_id: &str, label: &str, text: &str) -> Self {
        Self {
            option_id: option_id.to_string(),
            label: label.to_string(),
            action: ReplyAction::StaticReply(text.to_string()),
        }
    }

    pub fn notify_admin(option_id: &str, label: &str, user_text: &str, admin_template: &str) -> Self {
        Self {
            option_id: option_id.to_string(),
            label: label.to_string(),
            action: ReplyAction::NotifyAdminAndReply {
                user_text: user_text.to_string(),
                admin_template: admin_template.to_string(),
            },
        }
    }
}

/// How the transport should render a menu.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderMode {
    /// Inline buttons (at most MAX_BUTTON_OPTIONS options).
    Buttons,
    /// Scrollable list; no hard option cap.
    List,
}

/// A named menu: prompt, rendering mode, and ordered options. Immutable after construction.
#[derive(Debug, Clone)]
pub struct MenuDefinition {
    pub id: String,
    pub prompt: String,
    pub render: RenderMode,
    pub options: Vec<MenuOption>,
}

impl MenuDefinition {
    pub fn buttons(id: &str, prompt: &str, options: Vec<MenuOption>) -> Self {
        debug_assert!(
            options.len() <= MAX_BUTTON_OPTIONS,
            "button menu {} has {} options (max {})",
            id,
            options.len(),
            MAX_BUTTON_OPTIONS
        );
        Self {
            id: id.to_string(),
            prompt: prompt.to_string(),
            render: RenderMode::Buttons,
            options,
        }
    }

    pub fn list(id: &str, prompt: &str, options: Vec<MenuOption>) -> Self {
        Self {
            id: id.to_string(),
            prompt: prompt.to_string(),
            render: RenderMode::List,
            options,
        }
    }
}

/// Registry of menus keyed by id. Pure lookup, no side effects.
pub struct MenuCatalog {
    menus: HashMap<String, MenuDefinition>,
}

impl MenuCatalog {
    pub fn new(menus: Vec<MenuDefinition>) -> Self {
        let menus = menus.into_iter().map(|m| (m.id.clone(), m)).collect();
        Self { menus }
    }

    pub fn get_menu(&self, menu_id: &str) -> Option<&MenuDefinition> {
        self.menus.get(menu_id)
    }

    /// Resolve a selection against a menu: exact option id first, then
    /// case-insensitive exact label match (plain-text fallback for transports
    /// without structured replies).
    pub fn resolve_option(&self, menu_id: &str, option_id_or_label: &str) -> Option<&MenuOption> {
        let menu = self.menus.get(menu_id)?;
        if let Some(opt) = menu.options.iter().find(|o| o.option_id == option_id_or_label) {
            return Some(opt);
        }
        menu.options
            .iter()
            .find(|o| o.label.eq_ignore_ascii_case(option_id_or_label))
    }

    /// The built-in property menus: a 3-button main menu, a 5-entry list menu
    /// with admin contact and help, and the admin test menu sent on startup.
    pub fn default_catalog() -> Self {
        let listings = "Our listings:\n1. Cozy Apartment - $250,000\n2. Modern Villa - $750,000\n3. Luxury Condo - $500,000";
        let buy = "You chose to buy a property. Please reply with the property number or details.";
        let sell = "You chose to sell a property. Please send us your property details (address, price, photos).";
        let help = "FY'S PROPERTY bot: pick a menu option to view listings, buy, or sell. Send \"menu\" at any time to see the options again.";

        let main = MenuDefinition::buttons(
            "main",
            "Welcome to FY'S PROPERTY. Please choose an option:",
            vec![
                MenuOption::reply("view_listings", "View Listings", listings),
                MenuOption::reply("buy_property", "Buy Property", buy),
                MenuOption::reply("sell_property", "Sell Property", sell),
            ],
        );

        let full = MenuDefinition::list(
            "full",
            "Welcome to FY'S PROPERTY. Please choose an option:",
            vec![
                MenuOption::reply("view_listings", "View Listings", listings),
                MenuOption::reply("buy_property", "Buy Property", buy),
                MenuOption::reply("sell_property", "Sell Property", sell),
                MenuOption::notify_admin(
                    "contact_admin",
                    "Contact Admin",
                    "Thanks! Our admin has been notified and will contact you shortly.",
                    "User {from} wants to contact you. Reach out to them directly.",
                ),
                MenuOption::reply("help", "Help", help),
            ],
        );

        let admin = MenuDefinition::buttons(
            "admin",
            "FY'S PROPERTY Bot is LIVE!\nHere is your admin test menu:",
            vec![
                MenuOption::reply("test_view_listings", "Test: View Listings", listings),
                MenuOption::reply("test_buy_property", "Test: Buy Property", buy),
                MenuOption::reply("test_sell_property", "Test: Sell Property", sell),
            ],
        );

        Self::new(vec![main, full, admin])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_menu_by_id() {
        let catalog = MenuCatalog::default_catalog();
        assert!(catalog.get_menu("main").is_some());
        assert!(catalog.get_menu("admin").is_some());
        assert!(catalog.get_menu("nope").is_none());
    }

    #[test]
    fn main_menu_option_order() {
        let catalog = MenuCatalog::default_catalog();
        let main = catalog.get_menu("main").unwrap();
        assert_eq!(main.render, RenderMode::Buttons);
        let ids: Vec<&str> = main.options.iter().map(|o| o.option_id.as_str()).collect();
        assert_eq!(ids, ["view_listings", "buy_property", "sell_property"]);
    }

    #[test]
    fn resolve_by_option_id() {
        let catalog = MenuCatalog::default_catalog();
        let opt = catalog.resolve_option("main", "sell_property").unwrap();
        assert_eq!(opt.label, "Sell Property");
    }

    #[test]
    fn resolve_falls_back_to_label_case_insensitive() {
        let catalog = MenuCatalog::default_catalog();
        let opt = catalog.resolve_option("main", "view listings").unwrap();
        assert_eq!(opt.option_id, "view_listings");
    }

    #[test]
    fn resolve_prefers_id_over_label() {
        // A label that collides with another option's id must not shadow the id match.
        let menu = MenuDefinition::list(
            "m",
            "pick:",
            vec![
                MenuOption::reply("a", "b", "first"),
                MenuOption::reply("b", "other", "second"),
            ],
        );
        let catalog = MenuCatalog::new(vec![menu]);
        let opt = catalog.resolve_option("m", "b").unwrap();
        assert_eq!(opt.action, ReplyAction::StaticReply("second".to_string()));
    }

    #[test]
    fn resolve_unknown_is_none() {
        let catalog = MenuCatalog::default_catalog();
        assert!(catalog.resolve_option("main", "contact_admin").is_none());
        assert!(catalog.resolve_option("missing_menu", "view_listings").is_none());
    }

    #[test]
    fn full_menu_defines_admin_contact() {
        let catalog = MenuCatalog::default_catalog();
        let full = catalog.get_menu("full").unwrap();
        assert_eq!(full.render, RenderMode::List);
        let opt = catalog.resolve_option("full", "contact_admin").unwrap();
        assert!(matches!(opt.action, ReplyAction::NotifyAdminAndReply { .. }));
    }
}
