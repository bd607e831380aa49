//! Session-scoped transaction state machine
//!
//! | From          | Operation       | To          | Error                   |
//! |---------------|-----------------|-------------|-------------------------|
//! | NoTransaction | begin           | Began       |                         |
//! | Began         | begin           | unchanged   | TransactionInProgress   |
//! | Began         | commit          | Committed   |                         |
//! | Began         | abort / close   | Aborted     |                         |
//! | NoTransaction | commit / abort  | unchanged   | NoTransactionInProgress |
//! | Committed     | any             | unchanged   | NilPointer              |
//! | Aborted       | any             | unchanged   | NilPointer              |
//!
//! The tracker only decides whether a transition is legal and records the
//! outcome; the engine call itself is passed in as a closure so the table above
//! is testable without an engine.

use crate::core::engine::EngineResult;
use crate::core::error::EngineError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, strum::Display)]
pub enum TransactionState {
    #[default]
    NoTransaction,
    BeganTransaction,
    CommittedTransaction,
    AbortedTransaction,
}

impl TransactionState {
    /// Committed and aborted transactions cannot be resumed.
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            TransactionState::CommittedTransaction | TransactionState::AbortedTransaction
        )
    }
}

/// Current state plus the outcome of the most recent transaction operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransactionStatus {
    pub state: TransactionState,
    pub error: Option<EngineError>,
}

#[derive(Debug, Default)]
pub(crate) struct Transaction {
    status: TransactionStatus,
}

impl Transaction {
    pub(crate) fn status(&self) -> TransactionStatus {
        self.status
    }

    pub(crate) fn is_active(&self) -> bool {
        self.status.state == TransactionState::BeganTransaction
    }

    /// Records a rejection that happened before the state machine was
    /// consulted, e.g. a call on a closed session.
    pub(crate) fn reject(&mut self, err: EngineError) -> EngineResult<()> {
        self.status.error = Some(err);
        Err(err)
    }

    fn settle(
        &mut self,
        result: EngineResult<()>,
        on_success: TransactionState,
    ) -> EngineResult<()> {
        match result {
            Ok(()) => {
                self.status = TransactionStatus {
                    state: on_success,
                    error: None,
                };
                Ok(())
            }
            Err(err) => self.reject(err),
        }
    }

    pub(crate) fn begin(&mut self, call: impl FnOnce() -> EngineResult<()>) -> EngineResult<()> {
        match self.status.state {
            TransactionState::NoTransaction => {
                self.settle(call(), TransactionState::BeganTransaction)
            }
            TransactionState::BeganTransaction => {
                self.reject(EngineError::TransactionInProgress)
            }
            TransactionState::CommittedTransaction | TransactionState::AbortedTransaction => {
                self.reject(EngineError::NilPointer)
            }
        }
    }

    /// A commit the engine reports as already aborted leaves the transaction
    /// aborted.
    pub(crate) fn commit(&mut self, call: impl FnOnce() -> EngineResult<()>) -> EngineResult<()> {
        match self.status.state {
            TransactionState::BeganTransaction => match call() {
                Err(EngineError::TransactionAborted) => {
                    self.status = TransactionStatus {
                        state: TransactionState::AbortedTransaction,
                        error: Some(EngineError::TransactionAborted),
                    };
                    Err(EngineError::TransactionAborted)
                }
                result => self.settle(result, TransactionState::CommittedTransaction),
            },
            TransactionState::NoTransaction => self.reject(EngineError::NoTransactionInProgress),
            TransactionState::CommittedTransaction | TransactionState::AbortedTransaction => {
                self.reject(EngineError::NilPointer)
            }
        }
    }

    pub(crate) fn abort(&mut self, call: impl FnOnce() -> EngineResult<()>) -> EngineResult<()> {
        match self.status.state {
            TransactionState::BeganTransaction => {
                self.settle(call(), TransactionState::AbortedTransaction)
            }
            TransactionState::NoTransaction => self.reject(EngineError::NoTransactionInProgress),
            TransactionState::CommittedTransaction | TransactionState::AbortedTransaction => {
                self.reject(EngineError::NilPointer)
            }
        }
    }

    /// Teardown transition. An active transaction ends up aborted even when
    /// the explicit abort fails, since releasing the handle discards it.
    pub(crate) fn close(&mut self, call: impl FnOnce() -> EngineResult<()>) -> EngineResult<()> {
        if !self.is_active() {
            return Ok(());
        }
        let result = call();
        self.status = TransactionStatus {
            state: TransactionState::AbortedTransaction,
            error: result.err(),
        };
        result
    }
}
