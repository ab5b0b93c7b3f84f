use std::collections::VecDeque;

use tch::Tensor;

use crate::error::Result;

pub trait Env: Clone + Send + 'static {
    /// `(height, width)` of a single frame.
    fn frame_shape() -> (usize, usize);
    fn action_space() -> usize;
    /// The current frame as a `(height, width)` `u8` tensor.
    fn frame(&self) -> Tensor;
    fn episode_ended(&self) -> bool;
    fn reset(&mut self);
    fn step(&mut self, action: usize) -> f32;
}

/// The latest `len` frames, stacked along the last axis.
#[derive(Debug)]
pub struct FrameHistory {
    frames: VecDeque<Tensor>,
    len: usize,
}

impl FrameHistory {
    /// Starts a history filled with copies of `first`.
    #[must_use]
    pub fn new(len: usize, first: &Tensor) -> Self {
        let mut history = Self {
            frames: VecDeque::with_capacity(len),
            len,
        };
        history.reset(first);
        history
    }

    pub fn reset(&mut self, first: &Tensor) {
        self.frames.clear();
        self.frames
            .extend(std::iter::repeat_with(|| first.shallow_clone()).take(self.len));
    }

    pub fn push(&mut self, frame: Tensor) {
        if self.frames.len() == self.len {
            self.frames.pop_front();
        }
        self.frames.push_back(frame);
    }

    /// `(height, width, len)` observation, oldest frame first.
    pub fn state(&self) -> Result<Tensor> {
        let frames: Vec<&Tensor> = self.frames.iter().collect();
        Ok(Tensor::f_stack(&frames, 2)?)
    }
}

mod catch {
    use rand::Rng;
    use tch::Tensor;

    pub use super::Env as EnvTrait;

    const PIXEL_ON: u8 = 255;
    const PADDLE_HALF_WIDTH: usize = 1;
    const REWARD_CAUGHT: f32 = 1.0;
    const REWARD_MISSED: f32 = -1.0;

    /// A ball falls one row per step from a random column at the top. The
    /// paddle on the bottom row moves left, stays or moves right and has to
    /// be under the ball when it lands.
    #[derive(Clone, Debug)]
    pub struct Env<const SIZE: usize> {
        ball_row: usize,
        ball_col: usize,
        paddle_col: usize,
        episode_ended: bool,
    }

    impl<const SIZE: usize> Env<SIZE> {
        #[must_use]
        pub fn new() -> Self {
            let mut env = Self {
                ball_row: 0,
                ball_col: 0,
                paddle_col: SIZE / 2,
                episode_ended: false,
            };
            env.reset();
            env
        }

        fn caught(&self) -> bool {
            self.ball_col.abs_diff(self.paddle_col) <= PADDLE_HALF_WIDTH
        }
    }

    impl<const SIZE: usize> Default for Env<SIZE> {
        fn default() -> Self {
            Self::new()
        }
    }

    impl<const SIZE: usize> EnvTrait for Env<SIZE> {
        fn frame_shape() -> (usize, usize) {
            (SIZE, SIZE)
        }

        fn action_space() -> usize {
            3
        }

        fn frame(&self) -> Tensor {
            let mut pixels = vec![0_u8; SIZE * SIZE];

            pixels[self.ball_row * SIZE + self.ball_col] = PIXEL_ON;

            let bottom = (SIZE - 1) * SIZE;
            let left = self.paddle_col.saturating_sub(PADDLE_HALF_WIDTH);
            let right = (self.paddle_col + PADDLE_HALF_WIDTH).min(SIZE - 1);
            for col in left..=right {
                pixels[bottom + col] = PIXEL_ON;
            }

            Tensor::from_slice(&pixels).view([SIZE as i64, SIZE as i64])
        }

        fn episode_ended(&self) -> bool {
            self.episode_ended
        }

        fn reset(&mut self) {
            self.ball_row = 0;
            self.ball_col = rand::thread_rng().gen_range(0..SIZE);
            self.paddle_col = SIZE / 2;
            self.episode_ended = false;
        }

        fn step(&mut self, action: usize) -> f32 {
            if self.episode_ended {
                return 0.0;
            }

            self.paddle_col = match action {
                0 => self.paddle_col.saturating_sub(1),
                2 => (self.paddle_col + 1).min(SIZE - 1),
                _ => self.paddle_col,
            };

            self.ball_row += 1;

            if self.ball_row < SIZE - 1 {
                return 0.0;
            }

            self.episode_ended = true;

            if self.caught() {
                REWARD_CAUGHT
            } else {
                REWARD_MISSED
            }
        }
    }
}

pub use catch::Env as Catch;
