// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The FDU instance state machine.
//!
//! Controllers and agents both consult [`Command::check`] before acting, so a
//! request the agent would refuse is refused at the controller before any
//! intent is written.
//!
//! ```text
//!  (absent) --Define--> DEFINE --Configure--> CONFIGURE --Run--> RUN
//!     ^                   |  ^                 |   ^              |
//!     |                   |  +------Clean------+   +-----Stop-----+
//!     +-----Undefine------+
//!
//!  RUN --Pause--> PAUSE --Resume--> RUN       PAUSE --Stop--> CONFIGURE
//!  RUN --TakeOff--> TAKE_OFF --> (absent)    (source side of a migration)
//!  (absent) --Land--> LAND --> RUN           (destination side)
//! ```

use fog05_api_types::FduStatus;
use thiserror::Error;

/// A lifecycle command carried by a desired-state write.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, strum::Display)]
pub enum Command {
    Define,
    Configure,
    Run,
    Stop,
    Pause,
    Resume,
    Clean,
    Undefine,
    TakeOff,
    Land,
}

#[derive(Copy, Clone, Debug, Error, PartialEq, Eq)]
#[error(
    "cannot apply {command} to an instance in state {}",
    display_state(.from)
)]
pub struct InvalidTransition {
    pub from: Option<FduStatus>,
    pub command: Command,
}

fn display_state(state: &Option<FduStatus>) -> String {
    match state {
        Some(s) => s.to_string(),
        None => "UNDEFINED".to_string(),
    }
}

impl Command {
    /// Interprets the status of a desired record. `ERROR` is never intent.
    pub fn from_status(status: FduStatus) -> Option<Self> {
        Some(match status {
            FduStatus::Define => Command::Define,
            FduStatus::Configure => Command::Configure,
            FduStatus::Run => Command::Run,
            FduStatus::Stop => Command::Stop,
            FduStatus::Pause => Command::Pause,
            FduStatus::Resume => Command::Resume,
            FduStatus::Clean => Command::Clean,
            FduStatus::Undefine => Command::Undefine,
            FduStatus::TakeOff => Command::TakeOff,
            FduStatus::Land => Command::Land,
            FduStatus::Error => return None,
        })
    }

    /// The status written to the desired namespace for this command.
    pub fn status(self) -> FduStatus {
        match self {
            Command::Define => FduStatus::Define,
            Command::Configure => FduStatus::Configure,
            Command::Run => FduStatus::Run,
            Command::Stop => FduStatus::Stop,
            Command::Pause => FduStatus::Pause,
            Command::Resume => FduStatus::Resume,
            Command::Clean => FduStatus::Clean,
            Command::Undefine => FduStatus::Undefine,
            Command::TakeOff => FduStatus::TakeOff,
            Command::Land => FduStatus::Land,
        }
    }

    /// The actual state an agent publishes once the command has been fully
    /// applied, or `None` if the record is removed.
    pub fn settled_state(self) -> Option<FduStatus> {
        match self {
            Command::Define | Command::Clean => Some(FduStatus::Define),
            Command::Configure | Command::Stop => Some(FduStatus::Configure),
            Command::Run | Command::Resume | Command::Land => {
                Some(FduStatus::Run)
            }
            Command::Pause => Some(FduStatus::Pause),
            Command::Undefine | Command::TakeOff => None,
        }
    }

    /// Checks whether the command may be applied to an instance whose actual
    /// state is `from` (`None` when no record exists).
    pub fn check(
        self,
        from: Option<FduStatus>,
    ) -> Result<(), InvalidTransition> {
        use FduStatus as S;

        let allowed = match self {
            Command::Define | Command::Land => from.is_none(),
            Command::Configure => from == Some(S::Define),
            Command::Clean | Command::Run => from == Some(S::Configure),
            Command::Stop => matches!(from, Some(S::Run | S::Pause)),
            Command::Pause | Command::TakeOff => from == Some(S::Run),
            Command::Resume => from == Some(S::Pause),
            Command::Undefine => {
                matches!(from, Some(S::Define | S::Error | S::Land))
            }
        };

        if allowed {
            Ok(())
        } else {
            Err(InvalidTransition { from, command: self })
        }
    }
}
