use crate::error::Result;
use crate::level_set::EPSILON;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub index: i64,
    pub time_interval_in_seconds: f64,
}

impl Default for Frame {
    fn default() -> Self {
        Self {
            index: 0,
            time_interval_in_seconds: 1.0 / 60.0,
        }
    }
}

impl Frame {
    pub fn new(index: i64, time_interval_in_seconds: f64) -> Self {
        Self {
            index,
            time_interval_in_seconds,
        }
    }

    pub fn time_in_seconds(&self) -> f64 {
        self.index as f64 * self.time_interval_in_seconds
    }

    pub fn advance(&mut self) {
        self.index += 1;
    }

    pub fn advance_by(&mut self, frames: i64) {
        self.index += frames;
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AnimationClock {
    current_frame: Frame,
    current_time: f64,
    has_initialized: bool,
    is_using_fixed_sub_time_steps: bool,
    number_of_fixed_sub_time_steps: usize,
}

impl Default for AnimationClock {
    fn default() -> Self {
        Self {
            current_frame: Frame {
                index: -1,
                ..Frame::default()
            },
            current_time: 0.0,
            has_initialized: false,
            is_using_fixed_sub_time_steps: false,
            number_of_fixed_sub_time_steps: 1,
        }
    }
}

impl AnimationClock {
    pub fn current_frame(&self) -> Frame {
        self.current_frame
    }

    pub fn set_current_frame(&mut self, frame: Frame) {
        self.current_frame = frame;
    }

    pub fn current_time_in_seconds(&self) -> f64 {
        self.current_time
    }

    pub fn has_initialized(&self) -> bool {
        self.has_initialized
    }

    pub fn is_using_fixed_sub_time_steps(&self) -> bool {
        self.is_using_fixed_sub_time_steps
    }

    pub fn set_is_using_fixed_sub_time_steps(&mut self, fixed: bool) {
        self.is_using_fixed_sub_time_steps = fixed;
    }

    pub fn number_of_fixed_sub_time_steps(&self) -> usize {
        self.number_of_fixed_sub_time_steps
    }

    pub fn set_number_of_fixed_sub_time_steps(&mut self, steps: usize) {
        self.number_of_fixed_sub_time_steps = steps.max(1);
    }
}

/// Frame-driven simulation loop. Implementors provide one sub-step and,
/// optionally, how many sub-steps a time interval needs; the provided
/// methods split frames into sub-steps and keep the clock. A failing
/// sub-step stops the frame and leaves the clock at the last finished step.
pub trait PhysicsAnimation {
    fn clock(&self) -> &AnimationClock;

    fn clock_mut(&mut self) -> &mut AnimationClock;

    fn on_advance_time_step(&mut self, time_interval: f64) -> Result<()>;

    fn on_initialize(&mut self) -> Result<()> {
        Ok(())
    }

    fn number_of_sub_time_steps(&self, _time_interval: f64) -> Result<usize> {
        Ok(self.clock().number_of_fixed_sub_time_steps())
    }

    fn current_time_in_seconds(&self) -> f64 {
        self.clock().current_time_in_seconds()
    }

    fn initialize(&mut self) -> Result<()> {
        self.on_initialize()?;
        self.clock_mut().has_initialized = true;
        Ok(())
    }

    fn update(&mut self, frame: Frame) -> Result<()> {
        let current = self.clock().current_frame;
        if frame.index > current.index {
            if !self.clock().has_initialized {
                self.initialize()?;
            }
            let frames = frame.index - current.index;
            for _ in 0..frames {
                self.advance_time_step(frame.time_interval_in_seconds)?;
            }
            self.clock_mut().current_frame = frame;
        }
        Ok(())
    }

    fn advance_single_frame(&mut self) -> Result<()> {
        let mut frame = self.clock().current_frame;
        frame.advance();
        self.update(frame)
    }

    fn advance_time_step(&mut self, time_interval: f64) -> Result<()> {
        if self.clock().is_using_fixed_sub_time_steps {
            let steps = self.clock().number_of_fixed_sub_time_steps.max(1);
            let actual = time_interval / steps as f64;
            for _ in 0..steps {
                self.on_advance_time_step(actual)?;
                self.clock_mut().current_time += actual;
            }
        } else {
            let mut remaining = time_interval;
            while remaining > EPSILON {
                let steps = self.number_of_sub_time_steps(remaining)?.max(1);
                let actual = remaining / steps as f64;
                log::trace!("sub-step {actual:e} of {remaining:e} remaining ({steps} planned)");
                self.on_advance_time_step(actual)?;
                remaining -= actual;
                self.clock_mut().current_time += actual;
            }
        }
        Ok(())
    }
}
