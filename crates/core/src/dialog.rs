#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DialogButtonFocus {
    Accept,
    Decline,
}

impl DialogButtonFocus {
    pub fn toggle(&mut self) {
        *self = match self {
            Self::Accept => Self::Decline,
            Self::Decline => Self::Accept,
        };
    }
}

#[derive(Clone, Debug)]
pub struct ConfirmDialogState {
    pub message: String,
    pub accept_label: String,
    pub decline_label: String,
    pub focus: DialogButtonFocus,
}

#[derive(Clone, Debug)]
pub struct InputDialogState {
    pub prompt: String,
    pub value: String,
}

#[derive(Clone, Debug)]
pub enum DialogKind {
    Confirm(ConfirmDialogState),
    Input(InputDialogState),
}

#[derive(Clone, Debug)]
pub struct DialogState {
    pub title: String,
    pub kind: DialogKind,
}

impl DialogState {
    pub fn confirm(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self::choice(title, message, "Yes", "No")
    }

    /// Two-button question; Esc cancels without picking either.
    pub fn choice(
        title: impl Into<String>,
        message: impl Into<String>,
        accept_label: impl Into<String>,
        decline_label: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            kind: DialogKind::Confirm(ConfirmDialogState {
                message: message.into(),
                accept_label: accept_label.into(),
                decline_label: decline_label.into(),
                focus: DialogButtonFocus::Accept,
            }),
        }
    }

    pub fn input(
        title: impl Into<String>,
        prompt: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            kind: DialogKind::Input(InputDialogState {
                prompt: prompt.into(),
                value: value.into(),
            }),
        }
    }

    pub fn is_input(&self) -> bool {
        matches!(self.kind, DialogKind::Input(_))
    }

    pub fn handle_event(&mut self, event: DialogEvent) -> DialogTransition {
        match &mut self.kind {
            DialogKind::Confirm(confirm) => match event {
                DialogEvent::FocusNext => {
                    confirm.focus.toggle();
                    DialogTransition::Stay
                }
                DialogEvent::Accept => match confirm.focus {
                    DialogButtonFocus::Accept => {
                        DialogTransition::Close(DialogResult::ConfirmAccepted)
                    }
                    DialogButtonFocus::Decline => {
                        DialogTransition::Close(DialogResult::ConfirmDeclined)
                    }
                },
                DialogEvent::Cancel => DialogTransition::Close(DialogResult::Canceled),
                _ => DialogTransition::Stay,
            },
            DialogKind::Input(input) => match event {
                DialogEvent::InsertChar(ch) => {
                    input.value.push(ch);
                    DialogTransition::Stay
                }
                DialogEvent::Backspace => {
                    input.value.pop();
                    DialogTransition::Stay
                }
                DialogEvent::Accept => {
                    DialogTransition::Close(DialogResult::InputSubmitted(input.value.clone()))
                }
                DialogEvent::Cancel => DialogTransition::Close(DialogResult::Canceled),
                _ => DialogTransition::Stay,
            },
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DialogEvent {
    FocusNext,
    InsertChar(char),
    Backspace,
    Accept,
    Cancel,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum DialogResult {
    ConfirmAccepted,
    ConfirmDeclined,
    InputSubmitted(String),
    Canceled,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum DialogTransition {
    Stay,
    Close(DialogResult),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn choice_dialog_focus_and_accept_behavior() {
        let mut dialog = DialogState::choice("Quit", "Jobs are running", "Wait", "Abandon");
        assert_eq!(
            dialog.handle_event(DialogEvent::FocusNext),
            DialogTransition::Stay
        );
        let DialogKind::Confirm(confirm) = &dialog.kind else {
            panic!("expected confirm dialog");
        };
        assert_eq!(confirm.focus, DialogButtonFocus::Decline);
        assert_eq!(confirm.decline_label, "Abandon");
        assert_eq!(
            dialog.handle_event(DialogEvent::Accept),
            DialogTransition::Close(DialogResult::ConfirmDeclined)
        );
    }

    #[test]
    fn confirm_dialog_cancel_event_closes_dialog() {
        let mut dialog = DialogState::confirm("Remove", "Remove 2 item(s)?");
        assert_eq!(
            dialog.handle_event(DialogEvent::Cancel),
            DialogTransition::Close(DialogResult::Canceled)
        );
    }

    #[test]
    fn input_dialog_editing_and_accept_behavior() {
        let mut dialog = DialogState::input("Archive", "Archive name:", "arch");
        for event in [
            DialogEvent::InsertChar('x'),
            DialogEvent::Backspace,
            DialogEvent::InsertChar('1'),
        ] {
            assert_eq!(dialog.handle_event(event), DialogTransition::Stay);
        }
        assert_eq!(
            dialog.handle_event(DialogEvent::Accept),
            DialogTransition::Close(DialogResult::InputSubmitted(String::from("arch1")))
        );
    }
}
