//! A single fixed-size window and the OS event loop that drives it.
//!
//! The loop polls rather than waits: once pending OS events are drained the
//! handler's [`on_frame`](WindowHandler::on_frame) runs, so a renderer can
//! present back to back without requesting redraws.

use geometry::{Extent, Px};
use raw_window_handle::{HasRawWindowHandle, RawWindowHandle};
use winit::{
    dpi::{LogicalSize, PhysicalSize},
    event::{ElementState, Event, KeyboardInput, VirtualKeyCode, WindowEvent},
    event_loop::EventLoop,
    window::WindowBuilder,
};

pub use winit::error::OsError;

/// The keys the shell reports. Everything else is ignored.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Key {
    M,
    Space,
    Escape,
}

impl Key {
    fn from_winit(key: VirtualKeyCode) -> Option<Self> {
        match key {
            VirtualKeyCode::M => Some(Key::M),
            VirtualKeyCode::Space => Some(Key::Space),
            VirtualKeyCode::Escape => Some(Key::Escape),
            _ => None,
        }
    }
}

/// Enumerates button states.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ButtonState {
    Pressed,
    Released,
    /// The number of 'repeat' cycles a button has been pressed for. The
    /// frequency of these cycles is operating system dependent and may be
    /// changed by the user.
    Repeated(u16),
}

/// Trait for handling window events.
pub trait WindowHandler {
    /// Called when a reported key is pressed, repeated or released.
    fn on_key(&mut self, control: &mut dyn WindowControl, key: Key, state: ButtonState);

    /// Called when the user has requested that the window be closed, either by
    /// clicking the X, by pressing Alt-F4, etc. Returning `true` exits.
    fn on_close_request(&mut self, _control: &mut dyn WindowControl) -> bool {
        true
    }

    /// Called once per loop iteration, after all pending OS events have been
    /// handled.
    fn on_frame(&mut self, control: &mut dyn WindowControl);

    /// Called once when the loop ends. This is the last event the handler
    /// receives; the process exits when it returns.
    fn on_destroy(&mut self);
}

/// Trait for feeding back window control to the shell.
pub trait WindowControl {
    /// Ends the event loop after the current iteration.
    fn exit(&mut self);
}

/// A description of the window.
pub struct WindowDesc<'a> {
    pub title: &'a str,
    /// Client area size. The window cannot be resized.
    pub size: Extent<u32, Px>,
}

/// The window, as seen by code that needs to render into it.
#[derive(Clone, Copy)]
pub struct Window<'a>(&'a winit::window::Window);

impl Window<'_> {
    #[must_use]
    pub fn inner_size(&self) -> Extent<u32, Px> {
        as_extent(self.0.inner_size())
    }
}

unsafe impl HasRawWindowHandle for Window<'_> {
    fn raw_window_handle(&self) -> RawWindowHandle {
        self.0.raw_window_handle()
    }
}

pub struct Shell {
    event_loop: EventLoop<()>,
    window: winit::window::Window,
}

impl Shell {
    /// Opens the window. It is visible immediately but nothing is drawn
    /// until [`run`](Self::run).
    pub fn new(desc: &WindowDesc) -> Result<Self, OsError> {
        let event_loop = EventLoop::new();
        let window = WindowBuilder::new()
            .with_title(desc.title)
            .with_inner_size(as_logical_size(desc.size))
            .with_resizable(false)
            .build(&event_loop)?;

        log::info!(
            "opened window {:?} ({}x{})",
            desc.title,
            desc.size.width,
            desc.size.height
        );

        Ok(Self { event_loop, window })
    }

    #[must_use]
    pub fn window(&self) -> Window<'_> {
        Window(&self.window)
    }

    /// Runs the OS event loop until the handler exits or the window is
    /// closed. Never returns.
    pub fn run(self, mut handler: impl WindowHandler + 'static) -> ! {
        let Self { event_loop, window } = self;
        let mut repeat = KeyRepeat::default();

        event_loop.run(move |event, _, control_flow| {
            let mut control = Control { exit: false };

            match event {
                Event::WindowEvent { window_id, event } if window_id == window.id() => match event {
                    WindowEvent::CloseRequested => {
                        if handler.on_close_request(&mut control) {
                            control.exit();
                        }
                    }
                    WindowEvent::KeyboardInput { input, .. } => {
                        if let Some((key, state)) = repeat.track(input) {
                            handler.on_key(&mut control, key, state);
                        }
                    }
                    _ => {}
                },
                Event::MainEventsCleared => handler.on_frame(&mut control),
                Event::LoopDestroyed => {
                    log::info!("event loop finished");
                    handler.on_destroy();
                    return;
                }
                _ => {}
            }

            if control.exit {
                control_flow.set_exit();
            } else {
                control_flow.set_poll();
            }
        })
    }
}

struct Control {
    exit: bool,
}

impl WindowControl for Control {
    fn exit(&mut self) {
        self.exit = true;
    }
}

/// Turns raw key transitions into pressed, repeated and released states.
#[derive(Default)]
struct KeyRepeat {
    held: Option<(VirtualKeyCode, u16)>,
}

impl KeyRepeat {
    fn track(&mut self, input: KeyboardInput) -> Option<(Key, ButtonState)> {
        let code = input.virtual_keycode?;
        let state = self.transition(code, input.state);
        Key::from_winit(code).map(|key| (key, state))
    }

    fn transition(&mut self, code: VirtualKeyCode, state: ElementState) -> ButtonState {
        match state {
            ElementState::Pressed => match self.held {
                Some((held, count)) if held == code => {
                    self.held = Some((code, count + 1));
                    ButtonState::Repeated(count + 1)
                }
                _ => {
                    self.held = Some((code, 0));
                    ButtonState::Pressed
                }
            },
            ElementState::Released => {
                if matches!(self.held, Some((held, _)) if held == code) {
                    self.held = None;
                }
                ButtonState::Released
            }
        }
    }
}

fn as_logical_size(size: Extent<u32, Px>) -> LogicalSize<u32> {
    LogicalSize::new(size.width, size.height)
}

fn as_extent(size: PhysicalSize<u32>) -> Extent<u32, Px> {
    Extent::new(size.width, size.height)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_bound_keys_are_reported() {
        assert_eq!(Key::from_winit(VirtualKeyCode::M), Some(Key::M));
        assert_eq!(Key::from_winit(VirtualKeyCode::Space), Some(Key::Space));
        assert_eq!(Key::from_winit(VirtualKeyCode::Escape), Some(Key::Escape));
        assert_eq!(Key::from_winit(VirtualKeyCode::N), None);
    }

    #[test]
    fn held_keys_repeat() {
        let mut repeat = KeyRepeat::default();

        assert_eq!(
            repeat.transition(VirtualKeyCode::M, ElementState::Pressed),
            ButtonState::Pressed
        );
        assert_eq!(
            repeat.transition(VirtualKeyCode::M, ElementState::Pressed),
            ButtonState::Repeated(1)
        );
        assert_eq!(
            repeat.transition(VirtualKeyCode::M, ElementState::Pressed),
            ButtonState::Repeated(2)
        );
        assert_eq!(
            repeat.transition(VirtualKeyCode::M, ElementState::Released),
            ButtonState::Released
        );
        assert_eq!(
            repeat.transition(VirtualKeyCode::M, ElementState::Pressed),
            ButtonState::Pressed
        );
    }

    #[test]
    fn a_new_key_resets_the_repeat() {
        let mut repeat = KeyRepeat::default();

        repeat.transition(VirtualKeyCode::M, ElementState::Pressed);
        assert_eq!(
            repeat.transition(VirtualKeyCode::Space, ElementState::Pressed),
            ButtonState::Pressed
        );

        // Releasing the earlier key leaves the newer one held.
        repeat.transition(VirtualKeyCode::M, ElementState::Released);
        assert_eq!(
            repeat.transition(VirtualKeyCode::Space, ElementState::Pressed),
            ButtonState::Repeated(1)
        );
    }
}
