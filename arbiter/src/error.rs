use crate::chain::RpcError;
use arbiter_cryptography::Digest;
use thiserror::Error;

/// Errors that can occur while syncing the committee, proposing, answering or merging.
#[derive(Error, Debug)]
pub enum Error {
    #[error("no committee")]
    NoCommittee,
    #[error("no committee snapshot for height {0}")]
    UnknownHeight(u64),
    #[error("invalid committee: {0}")]
    InvalidCommittee(&'static str),
    #[error("invalid script: {0}")]
    InvalidScript(&'static str),
    #[error("not on duty")]
    NotOnDuty,
    #[error("duplicate proposal: {0}")]
    DuplicateProposal(Digest),
    #[error("unknown proposal: {0}")]
    UnknownProposal(Digest),
    #[error("signer not in script")]
    InvalidSigner,
    #[error("already signed")]
    AlreadySigned,
    #[error("invalid signing state")]
    InvalidState,
    #[error("proposer not on duty at proposal height")]
    StaleProposer,
    #[error("invalid proposer signature")]
    InvalidProposerSignature,
    #[error("invalid feedback signature")]
    InvalidFeedbackSignature,
    #[error("invalid contribution")]
    InvalidContribution,
    #[error("not a proposal")]
    NotProposal,
    #[error("not feedback")]
    NotFeedback,
    #[error("already answered: {0}")]
    AlreadyAnswered(Digest),
    #[error("sender is not the envelope target")]
    PeerMismatch,
    #[error("script mismatch")]
    ScriptMismatch,
    #[error("check failed: {0}")]
    Check(&'static str),
    #[error("unknown command")]
    UnknownCommand,
    #[error("send failed: {0}")]
    SendFailed(String),
    #[error("rpc: {0}")]
    Rpc(#[from] RpcError),
    #[error("codec: {0}")]
    Codec(#[from] arbiter_codec::Error),
    #[error("cryptography: {0}")]
    Cryptography(#[from] arbiter_cryptography::Error),
}

impl Error {
    /// Returns true if the error is a protocol violation that should be dropped without
    /// further action.
    pub fn ignorable(&self) -> bool {
        matches!(
            self,
            Error::AlreadySigned
                | Error::UnknownProposal(_)
                | Error::StaleProposer
                | Error::NotProposal
                | Error::NotFeedback
                | Error::AlreadyAnswered(_)
                | Error::Check(_)
        )
    }

    /// Returns true if retrying the same operation later may succeed.
    pub fn transient(&self) -> bool {
        matches!(self, Error::Rpc(_) | Error::SendFailed(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(Error::AlreadySigned.ignorable());
        assert!(!Error::ScriptMismatch.ignorable());
        assert!(!Error::ScriptMismatch.transient());
        assert!(Error::Rpc(RpcError("timeout".into())).transient());
        assert!(!Error::InvalidSigner.ignorable());
        assert!(!Error::InvalidSigner.transient());
    }
}
