use crate::follow::FollowState;

/// Ordered, append-only log lines plus follow mode.
///
/// The buffer has no upper bound. Very long-running jobs grow it without
/// limit; truncation or virtualization belongs to the renderer.
#[derive(Debug, Clone, Default)]
pub struct PresentationBuffer {
    lines: Vec<String>,
    follow: FollowState,
    scroll_requested: bool,
}

impl PresentationBuffer {
    pub fn new(follow: bool) -> Self {
        Self {
            lines: Vec::new(),
            follow: FollowState::new(follow),
            scroll_requested: false,
        }
    }

    /// Append one line. Returns true when the consumer should scroll to the
    /// end afterwards.
    pub fn append(&mut self, line: impl Into<String>) -> bool {
        self.lines.push(line.into());
        self.note_growth()
    }

    pub fn extend<I>(&mut self, lines: I) -> bool
    where
        I: IntoIterator<Item = String>,
    {
        let before = self.lines.len();
        self.lines.extend(lines);
        if self.lines.len() == before {
            return false;
        }
        self.note_growth()
    }

    fn note_growth(&mut self) -> bool {
        let follow = self.follow.should_follow_after_update();
        if follow {
            self.scroll_requested = true;
        }
        follow
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn follow_mode(&self) -> bool {
        self.follow.should_follow_after_update()
    }

    pub fn follow_state(&self) -> &FollowState {
        &self.follow
    }

    /// Toggle follow mode. Content is untouched; turning follow back on asks
    /// the consumer to jump to the end once.
    pub fn set_follow_mode(&mut self, follow: bool) {
        let was_following = self.follow_mode();
        self.follow.set(follow);
        if follow && !was_following {
            self.scroll_requested = true;
        }
    }

    /// Consume a pending scroll-to-end request.
    pub fn take_scroll_request(&mut self) -> bool {
        std::mem::take(&mut self.scroll_requested)
    }
}
