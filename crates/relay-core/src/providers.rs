//! Per-provider send-rate table for bulk email batching.
//!
//! Producers shaping outbound email batches look up how many messages per
//! minute a receiving provider tolerates. Lookup is case-insensitive and
//! unknown providers fall back to the conservative [`Provider::Custom`]
//! rate.

use std::fmt;

/// Known receiving email providers with vetted send rates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provider {
    /// Google Mail.
    Gmail,
    /// Microsoft Outlook / Office 365.
    Outlook,
    /// Yahoo Mail.
    Yahoo,
    /// SendGrid relay.
    Sendgrid,
    /// Mailgun relay.
    Mailgun,
    /// Amazon SES.
    Ses,
    /// Zoho Mail.
    Zoho,
    /// Anything not in the table.
    Custom,
}

impl Provider {
    /// Resolves a provider name, case-insensitively.
    ///
    /// Unknown names resolve to [`Provider::Custom`] rather than an error so
    /// a misconfigured provider throttles conservatively instead of failing.
    pub fn parse(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "gmail" => Self::Gmail,
            "outlook" => Self::Outlook,
            "yahoo" => Self::Yahoo,
            "sendgrid" => Self::Sendgrid,
            "mailgun" => Self::Mailgun,
            "ses" => Self::Ses,
            "zoho" => Self::Zoho,
            _ => Self::Custom,
        }
    }

    /// Messages per minute this provider accepts without throttling.
    pub fn send_rate_per_minute(self) -> u32 {
        match self {
            Self::Gmail | Self::Yahoo => 100,
            Self::Outlook => 300,
            Self::Sendgrid | Self::Mailgun => 600,
            Self::Ses => 200,
            Self::Zoho => 150,
            Self::Custom => 60,
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Gmail => "gmail",
            Self::Outlook => "outlook",
            Self::Yahoo => "yahoo",
            Self::Sendgrid => "sendgrid",
            Self::Mailgun => "mailgun",
            Self::Ses => "ses",
            Self::Zoho => "zoho",
            Self::Custom => "custom",
        };
        f.write_str(name)
    }
}

/// Convenience lookup: send rate for a provider name.
pub fn send_rate_for(name: &str) -> u32 {
    Provider::parse(name).send_rate_per_minute()
}
