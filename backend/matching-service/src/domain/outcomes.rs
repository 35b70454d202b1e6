//! Business outcomes returned by ledger and gate operations.
//!
//! None of these are errors. Callers branch on them and show the
//! `user_message()` text; raw storage errors never reach users.

use serde::{Serialize, Serializer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LikeOutcome {
    Created,
    AlreadyExists,
    Blocked,
}

impl LikeOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            LikeOutcome::Created => "created",
            LikeOutcome::AlreadyExists => "already_exists",
            LikeOutcome::Blocked => "blocked",
        }
    }

    pub fn user_message(&self) -> &'static str {
        match self {
            LikeOutcome::Created => "Like sent.",
            LikeOutcome::AlreadyExists => "You already liked this profile.",
            LikeOutcome::Blocked => "This profile is not available.",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SparkOutcome {
    Sent,
    AlreadySent,
    InsufficientStock,
    Blocked,
}

impl SparkOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            SparkOutcome::Sent => "sent",
            SparkOutcome::AlreadySent => "already_sent",
            SparkOutcome::InsufficientStock => "insufficient_stock",
            SparkOutcome::Blocked => "blocked",
        }
    }

    pub fn user_message(&self) -> &'static str {
        match self {
            SparkOutcome::Sent => "Spark sent!",
            SparkOutcome::AlreadySent => "You already sent a spark to this profile.",
            SparkOutcome::InsufficientStock => "You have no sparks left for now.",
            SparkOutcome::Blocked => "This profile is not available.",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SparkWithdrawOutcome {
    Withdrawn,
    NotFound,
}

impl SparkWithdrawOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            SparkWithdrawOutcome::Withdrawn => "withdrawn",
            SparkWithdrawOutcome::NotFound => "not_found",
        }
    }

    pub fn user_message(&self) -> &'static str {
        match self {
            SparkWithdrawOutcome::Withdrawn => "Spark withdrawn.",
            SparkWithdrawOutcome::NotFound => "There is no spark to withdraw.",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EchoOfferOutcome {
    Offered,
    AlreadyOffered,
    HeartRequired,
    InsufficientStock,
    Blocked,
}

impl EchoOfferOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            EchoOfferOutcome::Offered => "offered",
            EchoOfferOutcome::AlreadyOffered => "already_offered",
            EchoOfferOutcome::HeartRequired => "heart_required",
            EchoOfferOutcome::InsufficientStock => "insufficient_stock",
            EchoOfferOutcome::Blocked => "blocked",
        }
    }

    pub fn user_message(&self) -> &'static str {
        match self {
            EchoOfferOutcome::Offered => "Echo offered!",
            EchoOfferOutcome::AlreadyOffered => "Your echo is already waiting for an answer.",
            EchoOfferOutcome::HeartRequired => "Send a spark first to offer an echo.",
            EchoOfferOutcome::InsufficientStock => "You have no echoes left for now.",
            EchoOfferOutcome::Blocked => "This profile is not available.",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EchoReturnOutcome {
    Returned,
    NotFound,
}

impl EchoReturnOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            EchoReturnOutcome::Returned => "returned",
            EchoReturnOutcome::NotFound => "not_found",
        }
    }

    pub fn user_message(&self) -> &'static str {
        match self {
            EchoReturnOutcome::Returned => "Echo returned. You can now chat!",
            EchoReturnOutcome::NotFound => "This echo is no longer available.",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EchoDeclineOutcome {
    Declined,
    NotFound,
}

impl EchoDeclineOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            EchoDeclineOutcome::Declined => "declined",
            EchoDeclineOutcome::NotFound => "not_found",
        }
    }

    pub fn user_message(&self) -> &'static str {
        match self {
            EchoDeclineOutcome::Declined => "Echo declined.",
            EchoDeclineOutcome::NotFound => "This echo is no longer available.",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllowReason {
    MutualSpark,
    EchoReturned,
    Entitlement,
    /// `first_admission` is false when the pair was granted earlier and no
    /// quota was consumed by this call.
    FreeQuota { first_admission: bool },
}

impl AllowReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            AllowReason::MutualSpark => "mutual_spark",
            AllowReason::EchoReturned => "echo_returned",
            AllowReason::Entitlement => "entitlement",
            AllowReason::FreeQuota { .. } => "free_quota",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    Blocked,
    QuotaExhausted,
}

impl DenyReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DenyReason::Blocked => "blocked",
            DenyReason::QuotaExhausted => "quota_exhausted",
        }
    }
}

/// Admission decision for opening or continuing a conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Allow(AllowReason),
    Deny(DenyReason),
}

impl GateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, GateDecision::Allow(_))
    }

    pub fn reason(&self) -> &'static str {
        match self {
            GateDecision::Allow(reason) => reason.as_str(),
            GateDecision::Deny(reason) => reason.as_str(),
        }
    }

    pub fn user_message(&self) -> &'static str {
        match self {
            GateDecision::Allow(_) => "Say hello!",
            GateDecision::Deny(DenyReason::Blocked) => "This conversation is not available.",
            GateDecision::Deny(DenyReason::QuotaExhausted) => {
                "You've used your free conversations for now. Upgrade to keep chatting."
            }
        }
    }
}

macro_rules! serialize_as_str {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl Serialize for $ty {
                fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                    serializer.serialize_str(self.as_str())
                }
            }
        )+
    };
}

serialize_as_str!(
    LikeOutcome,
    SparkOutcome,
    SparkWithdrawOutcome,
    EchoOfferOutcome,
    EchoReturnOutcome,
    EchoDeclineOutcome,
    AllowReason,
    DenyReason,
);
