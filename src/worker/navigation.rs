//! Game navigation: lobby entry, exit flows, balance reading.
//!
//! Locators here are the game client's stable selectors; profiles can
//! override the ones that vary per machine family via `button_locators`.

use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::surface::{ElementId, Locator, UiSurface};

/// Lobby grid item (one game card)
pub const LOBBY_GRID: &str = "#grid_gm_item";

/// Join button inside the game info box
pub const JOIN_BUTTON: &str =
    "//div[contains(@class, 'gm-info-box')]//span[normalize-space(text())='Join']";

/// Spin button (normal machines)
pub const SPIN_BUTTON: &str = ".my-button.btn_spin";

/// Spin button (special machines)
pub const SPIN_BUTTON_SPECIAL: &str = ".btn_spin .my-button";

/// Balance text (normal machines)
pub const BALANCE_TEXT: &str = ".balance-bg.hand_balance .text2";

/// Balance text (special machines)
pub const BALANCE_TEXT_SPECIAL: &str = ".h-balance.hand_balance .text2";

/// Cashout button candidates, most specific first
pub const CASHOUT_BUTTONS: &[&str] = &[
    ".handle-main .my-button.btn_cashout",
    ".handle-main .btn_cashout",
    ".my-button.btn_cashout",
    ".btn_cashout",
];

/// Exit-to-lobby button shown after cashout
pub const EXIT_BUTTON: &str = ".function-btn .reserve-btn-gray";

/// Exit confirmation button
pub const CONFIRM_BUTTON: &str = "//button[.//div[normalize-space(text())='Confirm']]";

/// Take/collect button pressed after special action sequences
pub const TAKE_BUTTON: &str = ".my-button.btn_take";

/// Error dialog shown when a machine rejects the session
pub const ERROR_DIALOG: &str = "div[class*='error'], .alert-error, .error-message";

/// Machine families needing the special spin/balance selectors.
pub const SPECIAL_GAMES: &[&str] = &["BULLBLITZ", "ALLABOARD"];

/// Whether an identifier belongs to a special-selector machine family.
pub fn is_special_game(identifier: &str) -> bool {
    SPECIAL_GAMES.iter().any(|k| identifier.contains(k))
}

/// Wall-clock pacing for UI interaction.
///
/// Real runs settle after actions and poll at human-ish rates; tests and
/// simulations collapse every wait to near zero via [`Pacing::fast`].
#[derive(Debug, Clone)]
pub struct Pacing {
    /// Short settle after a click
    pub settle_short: Duration,
    /// Settle after entering a card/dialog
    pub settle_medium: Duration,
    /// Settle after navigation or game load
    pub settle_long: Duration,
    /// Poll interval for locate retries and pause spins
    pub poll: Duration,
    /// Multiplier applied to config-derived wait times
    pub time_scale: f64,
}

impl Pacing {
    /// Production pacing.
    pub fn realtime() -> Self {
        Self {
            settle_short: Duration::from_millis(500),
            settle_medium: Duration::from_millis(1200),
            settle_long: Duration::from_secs(3),
            poll: Duration::from_millis(300),
            time_scale: 1.0,
        }
    }

    /// Near-zero pacing for tests and simulations.
    pub fn fast() -> Self {
        Self {
            settle_short: Duration::from_millis(1),
            settle_medium: Duration::from_millis(1),
            settle_long: Duration::from_millis(1),
            poll: Duration::from_millis(1),
            time_scale: 0.0,
        }
    }

    /// Scale a config-derived duration (seconds) by this pacing.
    pub fn scaled(&self, secs: f64) -> Duration {
        Duration::from_secs_f64((secs * self.time_scale).max(0.0))
    }
}

impl Default for Pacing {
    fn default() -> Self {
        Self::realtime()
    }
}

/// Poll for an element until it appears or the timeout elapses.
pub fn locate_with_timeout(
    surface: &mut dyn UiSurface,
    locator: &Locator,
    timeout: Duration,
    poll: Duration,
) -> Option<ElementId> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(element) = surface.locate(locator) {
            return Some(element);
        }
        if Instant::now() >= deadline {
            return None;
        }
        thread::sleep(poll);
    }
}

/// Locate-and-click in one step; absence or click failure both yield false.
pub fn safe_click(surface: &mut dyn UiSurface, locator: &Locator) -> bool {
    match surface.locate(locator) {
        Some(element) => match surface.click(element) {
            Ok(()) => true,
            Err(err) => {
                warn!("[Navigation] click failed on {}: {}", locator, err);
                false
            }
        },
        None => false,
    }
}

/// Whether the surface currently shows a game (rather than the lobby).
pub fn is_in_game(surface: &mut dyn UiSurface) -> bool {
    // The lobby grid wins: seeing it means we are not in a game even if
    // stale game chrome is still around.
    if surface.locate(&Locator::new(LOBBY_GRID)).is_some() {
        debug!("[Navigation] lobby grid visible, not in game");
        return false;
    }

    for indicator in [SPIN_BUTTON, BALANCE_TEXT, BALANCE_TEXT_SPECIAL] {
        if surface.locate(&Locator::new(indicator)).is_some() {
            return true;
        }
    }

    debug!("[Navigation] no game indicators found, assuming lobby");
    false
}

/// Find the target game card in the lobby and activate it.
///
/// Returns true once the card was clicked; the Join button is optional and
/// its absence is normal. The caller verifies in-game state afterwards.
pub fn enter_game(surface: &mut dyn UiSurface, identifier: &str, pacing: &Pacing) -> bool {
    if is_in_game(surface) {
        info!("[Navigation] already in game, skipping lobby entry");
        return true;
    }

    let card = Locator::game_card(identifier);
    let Some(element) = locate_with_timeout(surface, &card, pacing.scaled(10.0), pacing.poll)
    else {
        warn!("[Navigation] game card not found in lobby: {}", identifier);
        return false;
    };

    if let Err(err) = surface.click(element) {
        warn!("[Navigation] failed to click game card {}: {}", identifier, err);
        return false;
    }
    info!("[Navigation] clicked game card {}", identifier);
    thread::sleep(pacing.settle_medium);

    // The Join button does not always appear; skip quietly when absent.
    if safe_click(surface, &Locator::new(JOIN_BUTTON)) {
        info!("[Navigation] clicked Join");
        thread::sleep(pacing.settle_long);
    } else {
        debug!("[Navigation] no Join button, continuing");
    }

    true
}

/// Leave the current game and return to the lobby.
///
/// Cashout, then the optional Exit button, then the optional Confirm
/// dialog; verified by the lobby reappearing.
pub fn exit_to_lobby(surface: &mut dyn UiSurface, pacing: &Pacing) -> bool {
    if !is_in_game(surface) {
        info!("[Navigation] already in lobby");
        return true;
    }

    let mut clicked_cashout = false;
    for selector in CASHOUT_BUTTONS {
        if safe_click(surface, &Locator::new(*selector)) {
            clicked_cashout = true;
            break;
        }
    }
    if !clicked_cashout {
        warn!("[Navigation] no cashout button found, cannot exit");
        return false;
    }
    thread::sleep(pacing.settle_short);

    if safe_click(surface, &Locator::new(EXIT_BUTTON)) {
        info!("[Navigation] clicked exit to lobby");
        thread::sleep(pacing.settle_short);
    }

    if safe_click(surface, &Locator::new(CONFIRM_BUTTON)) {
        thread::sleep(pacing.settle_long);
    }

    if !is_in_game(surface) {
        info!("[Navigation] back in lobby");
        return true;
    }

    // One more settle before giving a verdict; exit animations are slow.
    thread::sleep(pacing.settle_medium);
    let out = !is_in_game(surface);
    if !out {
        warn!("[Navigation] still in game after exit flow");
    }
    out
}

/// Read the balance display and parse it as an integer.
///
/// Non-digit characters are stripped (thousands separators, currency
/// glyphs); an unreadable or absent display yields `None`.
pub fn parse_balance(
    surface: &mut dyn UiSurface,
    override_locator: Option<&str>,
    special: bool,
) -> Option<i64> {
    let selector = override_locator.unwrap_or(if special {
        BALANCE_TEXT_SPECIAL
    } else {
        BALANCE_TEXT
    });

    let element = surface.locate(&Locator::new(selector))?;
    let text = surface.read_text(element).ok()?;
    let digits: String = text.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() { None } else { digits.parse().ok() }
}

/// Click a sequence of text-anchored positions, optionally pressing Take.
pub fn click_positions(
    surface: &mut dyn UiSurface,
    positions: &[String],
    click_take: bool,
    pacing: &Pacing,
) {
    info!("[Navigation] clicking {} positions: {:?}", positions.len(), positions);
    for position in positions {
        if safe_click(surface, &Locator::text_span(position)) {
            info!("[Navigation] clicked position {}", position);
        } else {
            warn!("[Navigation] position not found: {}", position);
        }
        thread::sleep(pacing.settle_short);
    }

    if click_take {
        if safe_click(surface, &Locator::new(TAKE_BUTTON)) {
            info!("[Navigation] clicked Take");
        } else {
            warn!("[Navigation] Take button not found");
        }
    }
}

/// Whether the page looks like a dead 404-style error page.
pub fn page_looks_dead(surface: &mut dyn UiSurface) -> bool {
    match surface.evaluate("document.title") {
        Ok(serde_json::Value::String(title)) => {
            let title = title.to_ascii_lowercase();
            title.contains("404") || title.contains("not found")
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::MockSurface;

    #[test]
    fn test_is_in_game_prefers_lobby_grid() {
        let mut lobby = MockSurface::new().with_lobby_games(vec!["873-JJBX-0004"]);
        assert!(!is_in_game(&mut lobby));

        let mut game = MockSurface::new().starting_in_game();
        assert!(is_in_game(&mut game));
    }

    #[test]
    fn test_enter_game_happy_path() {
        let mut surface = MockSurface::new().with_lobby_games(vec!["873-JJBX-0004"]);
        assert!(enter_game(&mut surface, "873-JJBX-0004", &Pacing::fast()));
        assert!(surface.in_game());
    }

    #[test]
    fn test_enter_game_missing_card() {
        let mut surface = MockSurface::new().with_lobby_games(vec!["873-DFDC-0001"]);
        assert!(!enter_game(&mut surface, "873-JJBX-0004", &Pacing::fast()));
        assert!(!surface.in_game());
    }

    #[test]
    fn test_exit_to_lobby() {
        let mut surface = MockSurface::new().starting_in_game();
        assert!(exit_to_lobby(&mut surface, &Pacing::fast()));
        assert!(!surface.in_game());
    }

    #[test]
    fn test_parse_balance_strips_separators() {
        let mut surface = MockSurface::new()
            .starting_in_game()
            .with_balances(vec![1234]);
        // MockSurface renders balances as "1234,000".
        assert_eq!(parse_balance(&mut surface, None, false), Some(1_234_000));
    }

    #[test]
    fn test_parse_balance_absent_in_lobby() {
        let mut surface = MockSurface::new();
        assert_eq!(parse_balance(&mut surface, None, false), None);
    }

    #[test]
    fn test_special_game_detection() {
        assert!(is_special_game("873-BULLBLITZ-0001"));
        assert!(!is_special_game("873-JJBX-0004"));
    }

    #[test]
    fn test_click_positions_records_clicks() {
        let mut surface = MockSurface::new().starting_in_game();
        let clicks = surface.clicks_handle();
        click_positions(
            &mut surface,
            &["X1".to_string(), "X2".to_string()],
            true,
            &Pacing::fast(),
        );
        let clicks = clicks.lock().unwrap();
        assert_eq!(clicks.len(), 3); // X1, X2, Take
        assert!(clicks[0].contains("X1"));
        assert!(clicks[2].contains("btn_take"));
    }
}
