use std::time::Duration;

/// Tempo-driven playhead over a looping grid
///
/// The playhead moves a fixed number of pixels per tick and wraps at the
/// grid width, independent of any audio timing.
#[derive(Clone, Debug)]
pub struct PlayheadClock {
    tempo_bpm: u32,
    ticks_per_second: f64,
    pixels_per_beat: f64,
    grid_width_px: f64,
    offset_px: f64,
    ticks: u64,
}

impl PlayheadClock {
    pub fn new(
        tempo_bpm: u32,
        tick_interval: Duration,
        pixels_per_beat: f64,
        grid_width_beats: u32,
    ) -> Self {
        Self {
            tempo_bpm,
            ticks_per_second: 1000.0 / tick_interval.as_millis().max(1) as f64,
            pixels_per_beat,
            grid_width_px: f64::from(grid_width_beats) * pixels_per_beat,
            offset_px: 0.0,
            ticks: 0,
        }
    }

    pub fn tempo_bpm(&self) -> u32 {
        self.tempo_bpm
    }

    pub fn beats_per_second(&self) -> f64 {
        f64::from(self.tempo_bpm) / 60.0
    }

    /// Distance covered by one tick
    pub fn pixels_per_tick(&self) -> f64 {
        self.beats_per_second() * self.pixels_per_beat / self.ticks_per_second
    }

    pub fn grid_width_px(&self) -> f64 {
        self.grid_width_px
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Advance one tick, keeping the offset in `[0, grid_width_px)`
    pub fn advance(&mut self) -> f64 {
        self.ticks += 1;
        self.offset_px = (self.offset_px + self.pixels_per_tick()) % self.grid_width_px;
        self.offset_px
    }

    /// Visual length of `seconds` of audio at the current tempo
    pub fn span_px(&self, seconds: f64) -> f64 {
        seconds * self.beats_per_second() * self.pixels_per_beat
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clock(tempo: u32) -> PlayheadClock {
        PlayheadClock::new(tempo, Duration::from_millis(50), 20.0, 80)
    }

    #[test]
    fn test_pixels_per_tick() {
        assert_eq!(clock(120).pixels_per_tick(), 2.0);
        assert_eq!(clock(60).pixels_per_tick(), 1.0);
        assert_eq!(clock(90).pixels_per_tick(), 1.5);
        assert_eq!(clock(120).grid_width_px(), 1600.0);
    }

    #[test]
    fn test_wraps_after_one_grid() {
        let mut clock = clock(120);
        let delta = clock.pixels_per_tick();
        // 80 beats / (2 beats/s / 20 ticks/s)
        let ticks_per_loop = (80.0 / (2.0 / 20.0)) as u64;
        assert_eq!(ticks_per_loop, 800);

        for _ in 0..ticks_per_loop - 1 {
            let offset = clock.advance();
            assert!(offset > 0.0 && offset < clock.grid_width_px());
        }
        let wrapped = clock.advance();
        assert!(wrapped < delta, "offset {} did not wrap", wrapped);
        assert_eq!(clock.ticks(), 800);
    }

    #[test]
    fn test_never_reaches_grid_width() {
        let mut clock = clock(237);
        for _ in 0..10_000 {
            let offset = clock.advance();
            assert!((0.0..clock.grid_width_px()).contains(&offset));
        }
    }

    #[test]
    fn test_fast_tempo_wraps_by_remainder() {
        // 48000 BPM covers 800 px per tick
        let mut clock = clock(48_000);
        assert_eq!(clock.advance(), 800.0);
        assert_eq!(clock.advance(), 0.0);
        assert_eq!(clock.advance(), 800.0);
    }

    #[test]
    fn test_span_px() {
        assert_eq!(clock(120).span_px(10.0), 400.0);
        assert_eq!(clock(60).span_px(10.0), 200.0);
        assert_eq!(clock(120).span_px(0.0), 0.0);
    }
}
