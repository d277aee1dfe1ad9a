//! Pointer (mouse/touch) state for one drawing surface.
//!
//! Front ends feed raw pixel events in; the view calls `tick` once per frame
//! to turn them into a per-frame velocity and the normalised positions the
//! simulation wants.

use glam::Vec2;

/// Release within this many pixels of the press counts as a click.
pub const CLICK_DISTANCE: f32 = 4.0;

#[derive(Clone, Debug)]
pub struct Pointer {
    element_size: Vec2,
    /// Latest raw position from events, relative to the element's top-left.
    pending: Option<Vec2>,
    /// Position as of the last tick.
    position: Option<Vec2>,
    velocity: Vec2,
    drag_offset: Vec2,
    down: bool,
}

impl Pointer {
    pub fn new(width: f32, height: f32) -> Self {
        Self {
            element_size: Vec2::new(width.max(1.0), height.max(1.0)),
            pending: None,
            position: None,
            velocity: Vec2::ZERO,
            drag_offset: Vec2::ZERO,
            down: false,
        }
    }

    pub fn resize(&mut self, width: f32, height: f32) {
        self.element_size = Vec2::new(width.max(1.0), height.max(1.0));
    }

    pub fn element_size(&self) -> Vec2 {
        self.element_size
    }

    pub fn on_down(&mut self, x: f32, y: f32) {
        let p = Vec2::new(x, y);
        self.down = true;
        self.drag_offset = Vec2::ZERO;
        self.pending = Some(p);
        // a press must not produce a jump from the previous hover position
        self.position = Some(p);
    }

    pub fn on_move(&mut self, x: f32, y: f32) {
        self.pending = Some(Vec2::new(x, y));
    }

    /// Returns true when the release completes a click.
    pub fn on_up(&mut self, x: f32, y: f32) -> bool {
        let was_down = self.down;
        self.down = false;
        self.pending = Some(Vec2::new(x, y));
        was_down && self.drag_offset.length() < CLICK_DISTANCE
    }

    /// Advance one frame: velocity is the pixel distance moved since the last
    /// tick; while pressed it also accumulates into the drag offset.
    pub fn tick(&mut self) {
        let Some(next) = self.pending else {
            return;
        };
        if let Some(previous) = self.position {
            self.velocity = next - previous;
            if self.down {
                self.drag_offset += self.velocity;
            }
        }
        self.position = Some(next);
    }

    pub fn is_down(&self) -> bool {
        self.down
    }

    /// Position in pixels, `None` before the first event.
    pub fn position(&self) -> Option<Vec2> {
        self.position
    }

    /// Per-tick motion in pixels (y down).
    pub fn velocity(&self) -> Vec2 {
        self.velocity
    }

    pub fn drag_offset(&self) -> Vec2 {
        self.drag_offset
    }

    /// Position mapped to [-1, 1] with the origin at the centre and y up.
    /// Off-surface (far away) before the first event.
    pub fn normalized_centered_flipped_y(&self) -> Vec2 {
        match self.position {
            Some(p) => {
                let n = p / self.element_size * 2.0 - Vec2::ONE;
                Vec2::new(n.x, -n.y)
            }
            None => Vec2::splat(f32::MAX),
        }
    }

    /// Velocity in the same units as `normalized_centered_flipped_y`.
    pub fn velocity_normalized_flipped_y(&self) -> Vec2 {
        let v = self.velocity * 2.0 / self.element_size;
        Vec2::new(v.x, -v.y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalised_position() {
        let mut pointer = Pointer::new(200.0, 100.0);
        pointer.on_move(100.0, 50.0);
        pointer.tick();
        assert_eq!(pointer.normalized_centered_flipped_y(), Vec2::ZERO);

        pointer.on_move(0.0, 0.0);
        pointer.tick();
        assert_eq!(pointer.normalized_centered_flipped_y(), Vec2::new(-1.0, 1.0));

        pointer.on_move(200.0, 100.0);
        pointer.tick();
        assert_eq!(pointer.normalized_centered_flipped_y(), Vec2::new(1.0, -1.0));
    }

    #[test]
    fn test_velocity_per_tick() {
        let mut pointer = Pointer::new(100.0, 100.0);
        pointer.on_move(10.0, 10.0);
        pointer.tick();
        assert_eq!(pointer.velocity(), Vec2::ZERO);

        pointer.on_move(20.0, 5.0);
        pointer.tick();
        assert_eq!(pointer.velocity(), Vec2::new(10.0, -5.0));
        assert_eq!(pointer.velocity_normalized_flipped_y(), Vec2::new(0.2, 0.1));

        // No new events: the pointer is still.
        pointer.tick();
        assert_eq!(pointer.velocity(), Vec2::ZERO);
    }

    #[test]
    fn test_click_vs_drag() {
        let mut pointer = Pointer::new(100.0, 100.0);
        pointer.on_down(50.0, 50.0);
        pointer.on_move(52.0, 51.0);
        pointer.tick();
        assert!(pointer.on_up(52.0, 51.0));

        pointer.on_down(50.0, 50.0);
        pointer.on_move(60.0, 50.0);
        pointer.tick();
        assert_eq!(pointer.drag_offset(), Vec2::new(10.0, 0.0));
        assert!(!pointer.on_up(60.0, 50.0));
    }

    #[test]
    fn test_drag_only_accumulates_while_down() {
        let mut pointer = Pointer::new(100.0, 100.0);
        pointer.on_move(0.0, 0.0);
        pointer.tick();
        pointer.on_move(30.0, 0.0);
        pointer.tick();
        assert_eq!(pointer.drag_offset(), Vec2::ZERO);
        assert!(!pointer.is_down());
    }

    #[test]
    fn test_resize_changes_normalisation() {
        let mut pointer = Pointer::new(100.0, 100.0);
        pointer.on_move(50.0, 50.0);
        pointer.tick();
        pointer.resize(200.0, 200.0);
        assert_eq!(pointer.normalized_centered_flipped_y(), Vec2::new(-0.5, 0.5));
    }

    #[test]
    fn test_no_events_is_far_away() {
        let pointer = Pointer::new(100.0, 100.0);
        assert!(pointer.normalized_centered_flipped_y().x > 1.0e30);
    }
}
