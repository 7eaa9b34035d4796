//! Workflow screens and the callback vocabulary of the menu keyboard.

use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup};

use crate::session::menu::MenuView;

pub const SCREEN_MAIN: &str = "main";
pub const SCREEN_UPLOAD: &str = "upload";
pub const SCREEN_CATEGORIES: &str = "categories";
pub const SCREEN_STYLES: &str = "styles";
pub const SCREEN_GENERATING: &str = "generating";
pub const SCREEN_RESULT: &str = "result";
pub const SCREEN_BALANCE: &str = "balance";
pub const SCREEN_HELP: &str = "help";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mode {
    pub code: &'static str,
    pub title: &'static str,
    pub prompt_prefix: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Style {
    pub code: &'static str,
    pub title: &'static str,
    pub prompt: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Category {
    pub code: &'static str,
    pub title: &'static str,
    pub styles: &'static [Style],
}

pub const MODES: &[Mode] = &[
    Mode {
        code: "restyle",
        title: "🎨 Restyle a photo",
        prompt_prefix: "Redraw the whole reference photo, keeping its composition.",
    },
    Mode {
        code: "avatar",
        title: "🙂 Make an avatar",
        prompt_prefix: "Create a square head-and-shoulders avatar of the person in the reference photo.",
    },
];

pub const CATEGORIES: &[Category] = &[
    Category {
        code: "art",
        title: "🖼 Fine art",
        styles: &[
            Style {
                code: "oil",
                title: "Oil painting",
                prompt: "Render it as a textured oil painting with visible brush strokes.",
            },
            Style {
                code: "watercolor",
                title: "Watercolor",
                prompt: "Render it as a soft watercolor with bleeding edges on paper.",
            },
            Style {
                code: "sketch",
                title: "Pencil sketch",
                prompt: "Render it as a graphite pencil sketch with cross-hatching.",
            },
        ],
    },
    Category {
        code: "cartoon",
        title: "📺 Cartoon",
        styles: &[
            Style {
                code: "anime",
                title: "Anime",
                prompt: "Render it as a clean cel-shaded anime frame.",
            },
            Style {
                code: "comic",
                title: "Comic book",
                prompt: "Render it as a comic book panel with bold ink outlines and halftone shading.",
            },
        ],
    },
    Category {
        code: "retro",
        title: "📼 Retro",
        styles: &[
            Style {
                code: "pixel",
                title: "Pixel art",
                prompt: "Render it as 16-bit pixel art with a limited palette.",
            },
            Style {
                code: "polaroid",
                title: "Polaroid",
                prompt: "Render it as a faded 1970s instant photo.",
            },
        ],
    },
];

pub fn find_mode(code: &str) -> Option<&'static Mode> {
    MODES.iter().find(|mode| mode.code == code)
}

pub fn find_category(code: &str) -> Option<&'static Category> {
    CATEGORIES.iter().find(|category| category.code == code)
}

pub fn find_style(code: &str) -> Option<(&'static Category, &'static Style)> {
    CATEGORIES.iter().find_map(|category| {
        category
            .styles
            .iter()
            .find(|style| style.code == code)
            .map(|style| (category, style))
    })
}

/// Prompt sent to the generation backend for a mode and style pair.
pub fn generation_prompt(mode: &Mode, style: &Style) -> String {
    format!("{} {}", mode.prompt_prefix, style.prompt)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavTarget {
    Main,
    Upload,
    Categories,
    Styles,
    Balance,
    Help,
}

impl NavTarget {
    fn as_str(self) -> &'static str {
        match self {
            NavTarget::Main => "main",
            NavTarget::Upload => "upload",
            NavTarget::Categories => "categories",
            NavTarget::Styles => "styles",
            NavTarget::Balance => "balance",
            NavTarget::Help => "help",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value {
            "main" => Some(NavTarget::Main),
            "upload" => Some(NavTarget::Upload),
            "categories" => Some(NavTarget::Categories),
            "styles" => Some(NavTarget::Styles),
            "balance" => Some(NavTarget::Balance),
            "help" => Some(NavTarget::Help),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MenuAction {
    Mode(String),
    Category(String),
    Style(String),
    Nav(NavTarget),
}

impl MenuAction {
    pub fn parse(data: &str) -> Option<Self> {
        let (verb, arg) = data.split_once(':')?;
        if arg.is_empty() {
            return None;
        }
        match verb {
            "mode" => find_mode(arg).map(|mode| MenuAction::Mode(mode.code.to_string())),
            "cat" => find_category(arg)
                .map(|category| MenuAction::Category(category.code.to_string())),
            "style" => find_style(arg).map(|(_, style)| MenuAction::Style(style.code.to_string())),
            "nav" => NavTarget::parse(arg).map(MenuAction::Nav),
            _ => None,
        }
    }
}

fn nav_button(title: &str, target: NavTarget) -> InlineKeyboardButton {
    InlineKeyboardButton::callback(title.to_string(), format!("nav:{}", target.as_str()))
}

fn keyboard(rows: Vec<Vec<InlineKeyboardButton>>) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(rows)
}

fn with_notice(notice: Option<&str>, body: String) -> String {
    match notice {
        Some(notice) => format!("{notice}\n\n{body}"),
        None => body,
    }
}

pub fn main_menu(balance: i64, notice: Option<&str>) -> MenuView {
    let mut rows: Vec<Vec<InlineKeyboardButton>> = MODES
        .iter()
        .map(|mode| {
            vec![InlineKeyboardButton::callback(
                mode.title.to_string(),
                format!("mode:{}", mode.code),
            )]
        })
        .collect();
    rows.push(vec![
        nav_button("💳 Balance", NavTarget::Balance),
        nav_button("❓ Help", NavTarget::Help),
    ]);

    let body = format!(
        "<b>Photo styler</b>\nPick what to do with your photo.\n\nCredits: <b>{balance}</b>"
    );
    MenuView::new(SCREEN_MAIN, with_notice(notice, body), keyboard(rows)).with_banner()
}

pub fn upload_prompt(mode: &Mode, notice: Option<&str>) -> MenuView {
    let body = format!(
        "<b>{}</b>\nSend one photo to use as the reference. Albums are not accepted.",
        mode.title
    );
    MenuView::new(
        SCREEN_UPLOAD,
        with_notice(notice, body),
        keyboard(vec![vec![nav_button("⬅️ Back", NavTarget::Main)]]),
    )
}

pub fn categories_menu(notice: Option<&str>) -> MenuView {
    let mut rows: Vec<Vec<InlineKeyboardButton>> = CATEGORIES
        .iter()
        .map(|category| {
            vec![InlineKeyboardButton::callback(
                category.title.to_string(),
                format!("cat:{}", category.code),
            )]
        })
        .collect();
    rows.push(vec![
        nav_button("📷 New photo", NavTarget::Upload),
        nav_button("🏠 Main menu", NavTarget::Main),
    ]);
    MenuView::new(
        SCREEN_CATEGORIES,
        with_notice(notice, "Photo received. Choose a category.".to_string()),
        keyboard(rows),
    )
}

pub fn styles_menu(category: &Category, notice: Option<&str>) -> MenuView {
    let mut rows: Vec<Vec<InlineKeyboardButton>> = category
        .styles
        .iter()
        .map(|style| {
            vec![InlineKeyboardButton::callback(
                style.title.to_string(),
                format!("style:{}", style.code),
            )]
        })
        .collect();
    rows.push(vec![nav_button("⬅️ Categories", NavTarget::Categories)]);
    let body = format!("<b>{}</b>\nChoose a style.", category.title);
    MenuView::new(SCREEN_STYLES, with_notice(notice, body), keyboard(rows))
}

pub fn generating(style: &Style) -> MenuView {
    MenuView::new(
        SCREEN_GENERATING,
        format!("⏳ Generating <b>{}</b>. This can take a minute.", style.title),
        InlineKeyboardMarkup::default(),
    )
}

fn result_keyboard() -> InlineKeyboardMarkup {
    keyboard(vec![
        vec![nav_button("🎨 Another style", NavTarget::Styles)],
        vec![
            nav_button("📷 New photo", NavTarget::Upload),
            nav_button("🏠 Main menu", NavTarget::Main),
        ],
    ])
}

pub fn result_menu(balance: i64) -> MenuView {
    MenuView::new(
        SCREEN_RESULT,
        format!("✅ Done. Credits left: <b>{balance}</b>"),
        result_keyboard(),
    )
}

/// Result screen after a failed attempt; the reference photo is kept for a retry.
pub fn failure_menu(message: &str, balance: i64) -> MenuView {
    MenuView::new(
        SCREEN_RESULT,
        format!("⚠️ {message}\n\nCredits: <b>{balance}</b>"),
        result_keyboard(),
    )
}

pub fn balance_menu(balance: i64, cost: i64, notice: Option<&str>) -> MenuView {
    let body = format!(
        "Credits: <b>{balance}</b>\nEach generation costs {cost}. Ask an administrator to top up."
    );
    MenuView::new(
        SCREEN_BALANCE,
        with_notice(notice, body),
        keyboard(vec![vec![nav_button("🏠 Main menu", NavTarget::Main)]]),
    )
}

pub fn help_menu() -> MenuView {
    MenuView::new(
        SCREEN_HELP,
        "Pick a mode, send one photo, then a category and a style.\n\
         A credit is taken when generation starts and returned if you do not get a picture.\n\n\
         /start opens a fresh menu, /balance shows your credits."
            .to_string(),
        keyboard(vec![vec![nav_button("🏠 Main menu", NavTarget::Main)]]),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_callback_data() {
        assert_eq!(
            MenuAction::parse("mode:avatar"),
            Some(MenuAction::Mode("avatar".to_string()))
        );
        assert_eq!(
            MenuAction::parse("cat:retro"),
            Some(MenuAction::Category("retro".to_string()))
        );
        assert_eq!(
            MenuAction::parse("style:oil"),
            Some(MenuAction::Style("oil".to_string()))
        );
        assert_eq!(
            MenuAction::parse("nav:styles"),
            Some(MenuAction::Nav(NavTarget::Styles))
        );
    }

    #[test]
    fn rejects_unknown_or_malformed_data() {
        assert_eq!(MenuAction::parse("style:"), None);
        assert_eq!(MenuAction::parse("style:velvet"), None);
        assert_eq!(MenuAction::parse("nav"), None);
        assert_eq!(MenuAction::parse("buy:10"), None);
    }

    #[test]
    fn keyboard_callbacks_round_trip_through_parser() {
        let views = [
            main_menu(3, None),
            upload_prompt(&MODES[0], None),
            categories_menu(None),
            styles_menu(&CATEGORIES[1], None),
            result_menu(2),
            balance_menu(2, 1, None),
            help_menu(),
        ];
        for view in views {
            for button in view.keyboard.inline_keyboard.iter().flatten() {
                let teloxide::types::InlineKeyboardButtonKind::CallbackData(data) = &button.kind
                else {
                    panic!("menu buttons carry callback data");
                };
                assert!(MenuAction::parse(data).is_some(), "unparsed callback {data}");
            }
        }
    }

    #[test]
    fn style_codes_are_unique_across_categories() {
        let mut codes: Vec<&str> = CATEGORIES
            .iter()
            .flat_map(|category| category.styles.iter().map(|style| style.code))
            .collect();
        let total = codes.len();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), total);
    }

    #[test]
    fn main_menu_asks_for_banner_and_shows_balance() {
        let view = main_menu(7, Some("Menu refreshed."));
        assert!(view.show_banner);
        assert_eq!(view.screen_code, SCREEN_MAIN);
        assert!(view.text.starts_with("Menu refreshed."));
        assert!(view.text.contains("<b>7</b>"));
    }
}
