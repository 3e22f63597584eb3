//! Booking drafts: the caller-assembled description of a candidate session.
//!
//! The resolver treats a draft as opaque payload except for [`BookingDraft::validate`],
//! which rejects drafts that could never be stored.

use serde::{Deserialize, Serialize};

use crate::limits::*;
use crate::policy::BookingPolicy;

/// The free-text escape hatch among reason codes.
pub const OTHER_REASON: &str = "Other";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Student {
    pub student_id: String,
    pub name: String,
    pub surname: String,
    pub email: String,
    pub student_number: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupMember {
    pub name: String,
    pub surname: String,
    pub email: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionType {
    Individual,
    Group,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionMode {
    InPerson,
    Online,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingDraft {
    pub student: Student,
    pub session_type: SessionType,
    /// Other attendees of a group session; the booking student is not listed.
    pub group_members: Vec<GroupMember>,
    pub reasons: Vec<String>,
    /// Required when `reasons` contains [`OTHER_REASON`].
    pub other_reason: Option<String>,
    pub mode: SessionMode,
    pub comments: Option<String>,
}

fn blank(s: &str) -> bool {
    s.trim().is_empty()
}

fn plausible_email(s: &str) -> bool {
    match s.trim().split_once('@') {
        Some((local, domain)) => !local.is_empty() && domain.contains('.') && !domain.starts_with('.'),
        None => false,
    }
}

/// Free text must accompany [`OTHER_REASON`] and stay within the comment limit.
fn check_other_reason(wants_other: bool, other_reason: Option<&str>) -> Result<(), String> {
    match other_reason {
        Some(text) if wants_other && blank(text) => {
            Err("please specify the reason when selecting Other".into())
        }
        None if wants_other => Err("please specify the reason when selecting Other".into()),
        Some(text) if text.len() > MAX_COMMENT_LEN => Err("other reason too long".into()),
        _ => Ok(()),
    }
}

/// Why a session was called off, recorded with the `Cancelled` status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancellationNote {
    pub reason: String,
    /// Required when `reason` is [`OTHER_REASON`].
    pub other_reason: Option<String>,
}

impl CancellationNote {
    pub fn validate(&self) -> Result<(), String> {
        if blank(&self.reason) {
            return Err("a cancellation reason is required".into());
        }
        if self.reason.len() > MAX_REASON_LEN {
            return Err("cancellation reason too long".into());
        }
        check_other_reason(self.reason == OTHER_REASON, self.other_reason.as_deref())
    }
}

impl BookingDraft {
    /// Check the draft against the policy's form rules. The error is a
    /// user-facing message naming the first offending field.
    pub fn validate(&self, policy: &BookingPolicy) -> Result<(), String> {
        let s = &self.student;
        if blank(&s.student_id) {
            return Err("student id is required".into());
        }
        if blank(&s.name) || blank(&s.surname) {
            return Err("student name and surname are required".into());
        }
        if s.name.len() > MAX_NAME_LEN || s.surname.len() > MAX_NAME_LEN {
            return Err("student name too long".into());
        }
        if !plausible_email(&s.email) || s.email.len() > MAX_EMAIL_LEN {
            return Err(format!("invalid student email: {}", s.email));
        }
        if let Some(number) = &s.student_number
            && (number.len() != STUDENT_NUMBER_LEN || !number.chars().all(|c| c.is_ascii_digit()))
        {
            return Err(format!(
                "student number must be exactly {STUDENT_NUMBER_LEN} digits"
            ));
        }

        if self.reasons.is_empty() {
            return Err("at least one reason is required".into());
        }
        if self.reasons.len() > policy.max_reasons {
            return Err(format!("at most {} reasons may be selected", policy.max_reasons));
        }
        for (i, reason) in self.reasons.iter().enumerate() {
            if blank(reason) {
                return Err("reasons must not be blank".into());
            }
            if self.reasons[..i].contains(reason) {
                return Err(format!("duplicate reason: {reason}"));
            }
        }
        let wants_other = self.reasons.iter().any(|r| r == OTHER_REASON);
        check_other_reason(wants_other, self.other_reason.as_deref())?;

        match self.session_type {
            SessionType::Individual => {
                if !self.group_members.is_empty() {
                    return Err("individual sessions cannot list group members".into());
                }
            }
            SessionType::Group => {
                if self.group_members.is_empty() {
                    return Err("group sessions need at least one other student".into());
                }
                // The booking student counts towards the group size.
                if self.group_members.len() + 1 > policy.max_group_size {
                    return Err(format!(
                        "group size is limited to {} students",
                        policy.max_group_size
                    ));
                }
                for m in &self.group_members {
                    if blank(&m.name) || blank(&m.surname) {
                        return Err("group member name and surname are required".into());
                    }
                    if !plausible_email(&m.email) {
                        return Err(format!("invalid group member email: {}", m.email));
                    }
                    if let Some(domain) = &policy.member_email_domain
                        && !m.email.trim().ends_with(domain.as_str())
                    {
                        return Err(format!("group member emails must end with {domain}"));
                    }
                }
            }
        }

        if let Some(c) = &self.comments
            && c.len() > MAX_COMMENT_LEN
        {
            return Err("comments too long".into());
        }
        Ok(())
    }
}
