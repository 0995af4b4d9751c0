/*
    Copyright 2025 MydriaTech AB

    Licensed under the Apache License 2.0 with Free world makers exception
    1.0.0 (the "License"); you may not use this file except in compliance with
    the License. You should have obtained a copy of the License with the source
    or binary distribution in file named

        LICENSE-Apache-2.0-with-FWM-Exception-1.0.0

    Unless required by applicable law or agreed to in writing, software
    distributed under the License is distributed on an "AS IS" BASIS,
    WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
    See the License for the specific language governing permissions and
    limitations under the License.
*/

//! Connector errors.

use std::error::Error;
use std::fmt;

/// Cause of error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectorErrorKind {
    /// General failure. See message for details.
    Unspecified,
    /// The one-time registration at the control plane failed.
    RegistrationFailed,
    /// The control plane could not be reached for the configured number of
    /// attempts.
    MaxPingRetriesExceeded,
    /// Network or connection level failure.
    Transport,
    /// The remote answered with an unexpected status code or body.
    UnexpectedResponse,
    /// Encoding or decoding of a document failed.
    Serialization,
    /// Subscription to an empty subject was requested.
    EmptySubject,
    /// The subject is already subscribed.
    AlreadySubscribed,
    /// The event has no type and can't be published.
    EventTypeMissing,
    /// No connection to the transport is available.
    NotConnected,
    /// The event data section can't hold the requested content.
    InvalidEventData,
    /// Event handling failed in a way that requires the connector to stop.
    FatalEventHandling,
}

impl ConnectorErrorKind {
    /// Create a new instance with an error message.
    pub fn error_with_msg<S: AsRef<str>>(self, msg: S) -> ConnectorError {
        ConnectorError {
            kind: self,
            msg: Some(msg.as_ref().to_string()),
            source: None,
        }
    }

    /// Create a new instance without an error message.
    pub fn error(self) -> ConnectorError {
        ConnectorError {
            kind: self,
            msg: None,
            source: None,
        }
    }

    /// Create a new instance with an error message that wraps the cause.
    pub fn error_with_source<S, E>(self, msg: S, source: E) -> ConnectorError
    where
        S: AsRef<str>,
        E: Error + Send + Sync + 'static,
    {
        ConnectorError {
            kind: self,
            msg: Some(msg.as_ref().to_string()),
            source: Some(Box::new(source)),
        }
    }
}

impl fmt::Display for ConnectorErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/** Connector error.

Create a new instance via [ConnectorErrorKind].
*/
#[derive(Debug)]
pub struct ConnectorError {
    kind: ConnectorErrorKind,
    msg: Option<String>,
    source: Option<Box<dyn Error + Send + Sync + 'static>>,
}

impl ConnectorError {
    /// Return the type of error.
    pub fn kind(&self) -> &ConnectorErrorKind {
        &self.kind
    }

    /// Return `true` if this error or any error it wraps is of the kind
    /// [ConnectorErrorKind::FatalEventHandling].
    pub fn is_fatal(&self) -> bool {
        self.has_kind(ConnectorErrorKind::FatalEventHandling)
    }

    /// Return `true` if this error or any error in its source chain is of the
    /// requested kind.
    pub fn has_kind(&self, kind: ConnectorErrorKind) -> bool {
        if self.kind == kind {
            return true;
        }
        let mut next = self.source();
        while let Some(cause) = next {
            if let Some(connector_error) = cause.downcast_ref::<ConnectorError>()
                && connector_error.kind == kind
            {
                return true;
            }
            next = cause.source();
        }
        false
    }
}

impl fmt::Display for ConnectorError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match (&self.msg, &self.source) {
            (Some(msg), Some(source)) => write!(f, "{} {}: {}", self.kind, msg, source),
            (Some(msg), None) => write!(f, "{} {}", self.kind, msg),
            (None, Some(source)) => write!(f, "{}: {}", self.kind, source),
            (None, None) => write!(f, "{}", self.kind),
        }
    }
}

impl AsRef<ConnectorError> for ConnectorError {
    fn as_ref(&self) -> &ConnectorError {
        self
    }
}

impl Error for ConnectorError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.source
            .as_ref()
            .map(|source| source.as_ref() as &(dyn Error + 'static))
    }
}
