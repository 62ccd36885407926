//! Browser-automation surface abstraction.
//!
//! The engine never depends on a concrete automation technology — only on
//! this capability surface: navigate, locate, click, read text, screenshot,
//! evaluate, and console-event draining. Production deployments plug in a
//! real browser driver; tests and the `simulate` subcommand use
//! [`MockSurface`], a scriptable in-memory implementation.

use std::collections::{HashMap, VecDeque};
use std::io::Cursor;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use image::{ImageBuffer, RgbImage};
use serde::{Deserialize, Serialize};

/// Result type for surface operations
pub type SurfaceResult<T> = Result<T, SurfaceError>;

/// Error types for surface operations
#[derive(Debug)]
pub enum SurfaceError {
    /// Navigation failed or timed out
    Navigation(String),

    /// An element went away between locate and use
    Stale(String),

    /// Clicking or reading an element failed
    Action(String),

    /// Script evaluation failed
    Evaluate(String),

    /// Screenshot capture failed
    Screenshot(String),
}

impl std::fmt::Display for SurfaceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SurfaceError::Navigation(msg) => write!(f, "Navigation error: {}", msg),
            SurfaceError::Stale(msg) => write!(f, "Stale element: {}", msg),
            SurfaceError::Action(msg) => write!(f, "Action error: {}", msg),
            SurfaceError::Evaluate(msg) => write!(f, "Evaluate error: {}", msg),
            SurfaceError::Screenshot(msg) => write!(f, "Screenshot error: {}", msg),
        }
    }
}

impl std::error::Error for SurfaceError {}

/// A UI element locator (CSS selector or text-anchored XPath).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Locator(pub String);

impl Locator {
    pub fn new(selector: impl Into<String>) -> Self {
        Self(selector.into())
    }

    /// Locator for a lobby game card whose title contains `code`.
    pub fn game_card(code: &str) -> Self {
        Self(format!("#grid_gm_item[title*='{}']", code))
    }

    /// Locator for a span by its exact visible text.
    pub fn text_span(text: &str) -> Self {
        Self(format!("//span[normalize-space(text())='{}']", text))
    }

    /// Locator for a button by its visible label.
    pub fn button_text(label: &str) -> Self {
        Self(format!("button:has-text('{}')", label))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Locator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque handle to a located element, valid until the next navigation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ElementId(pub u64);

/// A console/page event captured from the surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsoleEvent {
    /// Event kind: "log", "warning", "error", "pageerror", ...
    pub kind: String,

    /// Message text
    pub text: String,

    /// When the event was observed
    pub timestamp: DateTime<Utc>,
}

impl ConsoleEvent {
    pub fn new(kind: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            text: text.into(),
            timestamp: Utc::now(),
        }
    }

    /// Whether this event counts as an error in reports.
    pub fn is_error(&self) -> bool {
        matches!(self.kind.as_str(), "error" | "pageerror")
    }
}

/// The capability surface the engine drives.
///
/// One surface instance is exclusively owned by one worker for its entire
/// lifetime; implementations need `Send` but never `Sync`.
pub trait UiSurface: Send {
    /// Navigate to a URL and wait for the page to settle.
    fn navigate(&mut self, url: &str) -> SurfaceResult<()>;

    /// Locate an element. `None` means "not present right now" — absence is
    /// a normal answer, not an error.
    fn locate(&mut self, locator: &Locator) -> Option<ElementId>;

    /// Click a previously located element.
    fn click(&mut self, element: ElementId) -> SurfaceResult<()>;

    /// Read an element's visible text.
    fn read_text(&mut self, element: ElementId) -> SurfaceResult<String>;

    /// Screenshot a single element as PNG bytes.
    fn screenshot_element(&mut self, element: ElementId) -> SurfaceResult<Vec<u8>>;

    /// Screenshot the full page as PNG bytes.
    fn screenshot_page(&mut self) -> SurfaceResult<Vec<u8>>;

    /// Evaluate a script in the page and return its JSON result.
    fn evaluate(&mut self, script: &str) -> SurfaceResult<serde_json::Value>;

    /// Drain console/page events accumulated since the last call.
    fn drain_console(&mut self) -> Vec<ConsoleEvent>;
}

// ============================================================================
// MockSurface
// ============================================================================

/// Default selectors the mock recognizes while "in game".
const GAME_SELECTOR_HINTS: &[&str] = &[
    "btn_spin",
    "hand_balance",
    "btn_cashout",
    "canvas",
    "video",
    "span[",
    "button",
];

/// A scriptable surface for tests and dry runs.
///
/// The mock models a minimal lobby/game world: a set of lobby game cards,
/// a scripted sequence of balance readings, canned console events and audio
/// probes, and solid-color screenshots. Every click and navigation is
/// recorded for assertions.
#[derive(Debug)]
pub struct MockSurface {
    in_game: bool,
    entry_sticks_in_lobby: bool,
    navigate_fails: bool,
    lobby_games: Vec<String>,
    balances: VecDeque<i64>,
    last_balance: Option<i64>,
    console_backlog: Vec<ConsoleEvent>,
    audio_probe: Option<serde_json::Value>,
    page_title: String,
    screenshot_color: [u8; 3],
    screenshot_size: (u32, u32),
    present: Vec<String>,

    elements: HashMap<u64, String>,
    next_element: u64,

    /// Selectors clicked, in order (shared so tests can observe after the
    /// surface moves into a worker)
    clicks: Arc<Mutex<Vec<String>>>,
    /// URLs navigated to, in order
    navigations: Arc<Mutex<Vec<String>>>,
}

impl MockSurface {
    pub fn new() -> Self {
        Self {
            in_game: false,
            entry_sticks_in_lobby: false,
            navigate_fails: false,
            lobby_games: Vec::new(),
            balances: VecDeque::new(),
            last_balance: None,
            console_backlog: Vec::new(),
            audio_probe: None,
            page_title: "Game Lobby".to_string(),
            screenshot_color: [40, 90, 140],
            screenshot_size: (200, 150),
            present: Vec::new(),
            elements: HashMap::new(),
            next_element: 1,
            clicks: Arc::new(Mutex::new(Vec::new())),
            navigations: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Game codes present as lobby cards.
    pub fn with_lobby_games(mut self, games: Vec<&str>) -> Self {
        self.lobby_games = games.into_iter().map(String::from).collect();
        self
    }

    /// Scripted sequence of balance readings; the last value repeats.
    pub fn with_balances(mut self, balances: Vec<i64>) -> Self {
        self.balances = balances.into_iter().collect();
        self
    }

    /// Canned console events delivered on the next drain.
    pub fn with_console_events(mut self, events: Vec<ConsoleEvent>) -> Self {
        self.console_backlog = events;
        self
    }

    /// Canned audio-monitor probe returned for monitor-dump scripts.
    pub fn with_audio_probe(mut self, probe: serde_json::Value) -> Self {
        self.audio_probe = Some(probe);
        self
    }

    /// Solid color used for all screenshots.
    pub fn with_screenshot_color(mut self, color: [u8; 3]) -> Self {
        self.screenshot_color = color;
        self
    }

    /// Make game-card clicks fail to enter the game.
    pub fn with_entry_failure(mut self) -> Self {
        self.entry_sticks_in_lobby = true;
        self
    }

    /// Make navigation fail outright.
    pub fn with_navigation_failure(mut self) -> Self {
        self.navigate_fails = true;
        self
    }

    /// Start already inside a game session.
    pub fn starting_in_game(mut self) -> Self {
        self.in_game = true;
        self
    }

    /// Additional selector substrings that should resolve.
    pub fn with_present_selectors(mut self, selectors: Vec<&str>) -> Self {
        self.present = selectors.into_iter().map(String::from).collect();
        self
    }

    /// Whether the mock currently considers itself inside a game.
    pub fn in_game(&self) -> bool {
        self.in_game
    }

    /// Shared handle to the recorded clicks.
    pub fn clicks_handle(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.clicks)
    }

    /// Shared handle to the recorded navigations.
    pub fn navigations_handle(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.navigations)
    }

    /// Snapshot of the recorded clicks.
    pub fn clicks(&self) -> Vec<String> {
        self.clicks.lock().expect("clicks mutex poisoned").clone()
    }

    fn selector_present(&self, selector: &str) -> bool {
        if self.present.iter().any(|p| selector.contains(p.as_str())) {
            return true;
        }
        if self.in_game {
            return GAME_SELECTOR_HINTS.iter().any(|hint| selector.contains(hint));
        }
        // In the lobby: the grid itself, and cards for known games.
        if selector.contains("grid_gm_item") {
            if let Some(start) = selector.find("title*='") {
                let rest = &selector[start + 8..];
                let code = rest.split('\'').next().unwrap_or("");
                return self.lobby_games.iter().any(|g| g.contains(code));
            }
            return true;
        }
        false
    }

    fn register(&mut self, selector: &str) -> ElementId {
        let id = self.next_element;
        self.next_element += 1;
        self.elements.insert(id, selector.to_string());
        ElementId(id)
    }

    fn solid_png(&self) -> SurfaceResult<Vec<u8>> {
        let (w, h) = self.screenshot_size;
        let [r, g, b] = self.screenshot_color;
        let img: RgbImage = ImageBuffer::from_pixel(w, h, image::Rgb([r, g, b]));
        let mut bytes = Vec::new();
        img.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
            .map_err(|e| SurfaceError::Screenshot(e.to_string()))?;
        Ok(bytes)
    }
}

impl Default for MockSurface {
    fn default() -> Self {
        Self::new()
    }
}

impl UiSurface for MockSurface {
    fn navigate(&mut self, url: &str) -> SurfaceResult<()> {
        if self.navigate_fails {
            return Err(SurfaceError::Navigation(format!("cannot reach {}", url)));
        }
        self.navigations
            .lock()
            .expect("navigations mutex poisoned")
            .push(url.to_string());
        self.in_game = false;
        self.elements.clear();
        Ok(())
    }

    fn locate(&mut self, locator: &Locator) -> Option<ElementId> {
        if self.selector_present(locator.as_str()) {
            Some(self.register(locator.as_str()))
        } else {
            None
        }
    }

    fn click(&mut self, element: ElementId) -> SurfaceResult<()> {
        let selector = self
            .elements
            .get(&element.0)
            .cloned()
            .ok_or_else(|| SurfaceError::Stale(format!("element {:?}", element)))?;

        self.clicks
            .lock()
            .expect("clicks mutex poisoned")
            .push(selector.clone());

        if selector.contains("grid_gm_item") && !self.entry_sticks_in_lobby {
            self.in_game = true;
        } else if selector.contains("btn_cashout") {
            self.in_game = false;
        }
        Ok(())
    }

    fn read_text(&mut self, element: ElementId) -> SurfaceResult<String> {
        let selector = self
            .elements
            .get(&element.0)
            .cloned()
            .ok_or_else(|| SurfaceError::Stale(format!("element {:?}", element)))?;

        if selector.contains("hand_balance") {
            let value = match self.balances.pop_front() {
                Some(value) => {
                    // Keep repeating the final scripted value.
                    if self.balances.is_empty() {
                        self.balances.push_back(value);
                    }
                    value
                }
                None => self.last_balance.unwrap_or(0),
            };
            self.last_balance = Some(value);
            return Ok(format!("{},000", value));
        }
        Ok(String::new())
    }

    fn screenshot_element(&mut self, _element: ElementId) -> SurfaceResult<Vec<u8>> {
        self.solid_png()
    }

    fn screenshot_page(&mut self) -> SurfaceResult<Vec<u8>> {
        self.solid_png()
    }

    fn evaluate(&mut self, script: &str) -> SurfaceResult<serde_json::Value> {
        if script.contains("__audioMonitor") {
            return Ok(self
                .audio_probe
                .clone()
                .unwrap_or(serde_json::Value::Null));
        }
        if script.contains("document.title") {
            return Ok(serde_json::Value::String(self.page_title.clone()));
        }
        Ok(serde_json::Value::Null)
    }

    fn drain_console(&mut self) -> Vec<ConsoleEvent> {
        std::mem::take(&mut self.console_backlog)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lobby_card_resolves_only_known_games() {
        let mut surface = MockSurface::new().with_lobby_games(vec!["873-JJBX-0004"]);
        assert!(surface.locate(&Locator::game_card("873-JJBX-0004")).is_some());
        assert!(surface.locate(&Locator::game_card("873-DFDC-0001")).is_none());
    }

    #[test]
    fn test_card_click_enters_game() {
        let mut surface = MockSurface::new().with_lobby_games(vec!["873-JJBX-0004"]);
        let card = surface.locate(&Locator::game_card("873-JJBX-0004")).unwrap();
        surface.click(card).unwrap();
        assert!(surface.in_game());
        // Game indicators resolve now, the lobby grid does not.
        assert!(surface.locate(&Locator::new(".my-button.btn_spin")).is_some());
    }

    #[test]
    fn test_balance_script_repeats_last_value() {
        let mut surface = MockSurface::new()
            .starting_in_game()
            .with_balances(vec![100, 90]);
        let balance = surface
            .locate(&Locator::new(".balance-bg.hand_balance .text2"))
            .unwrap();
        assert_eq!(surface.read_text(balance).unwrap(), "100,000");
        let balance = surface
            .locate(&Locator::new(".balance-bg.hand_balance .text2"))
            .unwrap();
        assert_eq!(surface.read_text(balance).unwrap(), "90,000");
        let balance = surface
            .locate(&Locator::new(".balance-bg.hand_balance .text2"))
            .unwrap();
        assert_eq!(surface.read_text(balance).unwrap(), "90,000");
    }

    #[test]
    fn test_screenshot_is_valid_png() {
        let mut surface = MockSurface::new().starting_in_game();
        let bytes = surface.screenshot_page().unwrap();
        let img = image::load_from_memory(&bytes).expect("decodable png");
        assert_eq!(img.width(), 200);
        assert_eq!(img.height(), 150);
    }

    #[test]
    fn test_drain_console_empties_backlog() {
        let mut surface = MockSurface::new()
            .with_console_events(vec![ConsoleEvent::new("error", "boom")]);
        assert_eq!(surface.drain_console().len(), 1);
        assert!(surface.drain_console().is_empty());
    }
}
