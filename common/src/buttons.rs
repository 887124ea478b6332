//! Button input state machine.
//!
//! Buttons are sampled on a fixed 50 ms cadence. Consecutive taps within
//! the hold threshold coalesce into one multi-click event; a press held
//! across the threshold becomes a hold gesture instead. The press-hold
//! and inter-click timeouts are deliberately the same value so the two
//! outcomes are mutually exclusive.
//!
//! Boundary policy: a gesture is a hold iff the press is still observed
//! high on the first sample at or after the threshold. The hold-start
//! edge is guarded by a per-gesture flag, never by comparing elapsed
//! time against a one-sample window, so sampling jitter cannot double-
//! fire or skip it.

pub const SAMPLE_PERIOD_MS: u64 = 50;
pub const HOLD_THRESHOLD_MS: u64 = 400;
pub const MAX_CLICKS: u8 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonEvent {
    /// A finished burst of 1..=MAX_CLICKS taps.
    Clicked { button: u8, clicks: u8 },
    HoldStart { button: u8 },
    HoldStop { button: u8 },
}

#[derive(Debug, Clone, Copy, Default)]
struct ButtonState {
    pressed: bool,
    pressed_at_ms: u64,
    released_at_ms: u64,
    clicks: u8,
    hold_active: bool,
}

#[derive(Debug)]
pub struct ButtonEngine {
    states: Vec<ButtonState>,
}

impl ButtonEngine {
    pub fn new(button_count: usize) -> Self {
        Self {
            states: vec![ButtonState::default(); button_count],
        }
    }

    /// Feeds one sample of all button levels. `levels[i]` is true while
    /// button `i` is physically pressed.
    pub fn sample(&mut self, levels: &[bool], now_ms: u64) -> Vec<ButtonEvent> {
        let mut events = Vec::new();
        for (index, state) in self.states.iter_mut().enumerate() {
            let button = index as u8;
            let level = levels.get(index).copied().unwrap_or(false);

            match (state.pressed, level) {
                (false, true) => {
                    state.pressed = true;
                    state.pressed_at_ms = now_ms;
                    if state.clicks < MAX_CLICKS {
                        state.clicks += 1;
                    }
                }
                (true, false) => {
                    state.pressed = false;
                    state.released_at_ms = now_ms;
                    if state.hold_active {
                        state.hold_active = false;
                        state.clicks = 0;
                        events.push(ButtonEvent::HoldStop { button });
                    }
                }
                (true, true) => {
                    if !state.hold_active
                        && now_ms.saturating_sub(state.pressed_at_ms) >= HOLD_THRESHOLD_MS
                    {
                        state.hold_active = true;
                        events.push(ButtonEvent::HoldStart { button });
                    }
                }
                (false, false) => {
                    if state.clicks > 0
                        && now_ms.saturating_sub(state.released_at_ms) >= HOLD_THRESHOLD_MS
                    {
                        let clicks = state.clicks;
                        state.clicks = 0;
                        events.push(ButtonEvent::Clicked { button, clicks });
                    }
                }
            }
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    /// Runs a scripted level sequence at the sample cadence and collects
    /// every emitted event with its timestamp.
    fn run(engine: &mut ButtonEngine, levels: &[bool]) -> Vec<(u64, ButtonEvent)> {
        let mut events = Vec::new();
        for (step, level) in levels.iter().enumerate() {
            let now = step as u64 * SAMPLE_PERIOD_MS;
            for event in engine.sample(&[*level], now) {
                events.push((now, event));
            }
        }
        events
    }

    fn pattern(spec: &str) -> Vec<bool> {
        spec.chars().map(|c| c == '#').collect()
    }

    #[test]
    fn triple_click_coalesces_into_one_event() {
        let mut engine = ButtonEngine::new(1);
        // Three 50 ms taps with 50 ms gaps, then idle past the threshold.
        let events = run(&mut engine, &pattern("#.#.#..........."));

        assert_eq!(
            events,
            vec![(
                650,
                ButtonEvent::Clicked {
                    button: 0,
                    clicks: 3
                }
            )]
        );
    }

    #[test]
    fn single_click_fires_after_gap() {
        let mut engine = ButtonEngine::new(1);
        let events = run(&mut engine, &pattern("#............"));
        assert_eq!(
            events,
            vec![(
                450,
                ButtonEvent::Clicked {
                    button: 0,
                    clicks: 1
                }
            )]
        );
    }

    #[test]
    fn hold_fires_start_once_then_stop_on_release() {
        let mut engine = ButtonEngine::new(1);
        // Held for 12 samples (600 ms), then released.
        let events = run(&mut engine, &pattern("############...."));

        assert_eq!(
            events,
            vec![
                (400, ButtonEvent::HoldStart { button: 0 }),
                (600, ButtonEvent::HoldStop { button: 0 }),
            ]
        );
    }

    #[test]
    fn exact_threshold_press_is_a_hold() {
        // Still high on the sample exactly at the threshold: classified as
        // a hold, not a click. This is the documented boundary policy.
        let mut engine = ButtonEngine::new(1);
        let events = run(&mut engine, &pattern("#########......."));

        assert_eq!(events[0], (400, ButtonEvent::HoldStart { button: 0 }));
        assert_eq!(events[1], (450, ButtonEvent::HoldStop { button: 0 }));
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn release_just_before_threshold_is_a_click() {
        let mut engine = ButtonEngine::new(1);
        // High for samples 0..=7 (released on the 400 ms sample itself, so
        // never observed high at the threshold).
        let events = run(&mut engine, &pattern("########.........."));

        assert_eq!(
            events,
            vec![(
                800,
                ButtonEvent::Clicked {
                    button: 0,
                    clicks: 1
                }
            )]
        );
    }

    #[test]
    fn clicks_saturate_at_cap() {
        let mut engine = ButtonEngine::new(1);
        // Seven rapid taps; accumulator must cap at 5, not wrap.
        let events = run(&mut engine, &pattern("#.#.#.#.#.#.#..........."));

        assert_eq!(events.len(), 1);
        assert_eq!(
            events[0].1,
            ButtonEvent::Clicked {
                button: 0,
                clicks: MAX_CLICKS
            }
        );
    }

    #[test]
    fn hold_discards_accumulated_clicks() {
        let mut engine = ButtonEngine::new(1);
        // Tap, then press-and-hold: the burst resolves as a hold gesture
        // and the pending click count is dropped.
        let events = run(&mut engine, &pattern("#.############.........."));

        assert_eq!(
            events,
            vec![
                (500, ButtonEvent::HoldStart { button: 0 }),
                (700, ButtonEvent::HoldStop { button: 0 }),
            ]
        );
    }

    #[test]
    fn buttons_are_tracked_independently() {
        let mut engine = ButtonEngine::new(2);
        let mut events = Vec::new();
        for step in 0..16u64 {
            let now = step * SAMPLE_PERIOD_MS;
            // Button 0 taps once; button 1 holds.
            let levels = [step == 0, step < 10];
            events.extend(engine.sample(&levels, now));
        }

        assert_eq!(
            events,
            vec![
                ButtonEvent::HoldStart { button: 1 },
                ButtonEvent::Clicked {
                    button: 0,
                    clicks: 1
                },
                ButtonEvent::HoldStop { button: 1 },
            ]
        );
    }
}
