use chrono::{DateTime, FixedOffset, Utc};

/// Minutes of silence after which a message gets its own time label.
pub const GAP_MINUTES: i64 = 15;

const FULL_FORMAT: &str = "%d/%m/%Y %H:%M";
const TIME_FORMAT: &str = "%H:%M";

/// Separator shown above a message in the conversation view.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum DateLabel {
    /// First message overall or of a new calendar day.
    FullDateTime(String),
    /// Same day, but more than [`GAP_MINUTES`] after the previous message.
    TimeOnly(String),
    #[default]
    None,
}

/// Labels for an ordered run of message timestamps, computed in `offset`.
pub fn date_labels<I>(times: I, offset: &FixedOffset) -> Vec<DateLabel>
where
    I: IntoIterator<Item = DateTime<Utc>>,
{
    let mut labels = Vec::new();
    let mut previous: Option<DateTime<FixedOffset>> = None;

    for time in times {
        let local = time.with_timezone(offset);
        let label = match previous {
            Some(prev) if prev.date_naive() == local.date_naive() => {
                if (local - prev).num_minutes() > GAP_MINUTES {
                    DateLabel::TimeOnly(local.format(TIME_FORMAT).to_string())
                } else {
                    DateLabel::None
                }
            }
            _ => DateLabel::FullDateTime(local.format(FULL_FORMAT).to_string()),
        };
        labels.push(label);
        previous = Some(local);
    }

    labels
}
