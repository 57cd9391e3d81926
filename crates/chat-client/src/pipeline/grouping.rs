//! Day grouping projection over a timeline

use chrono::{FixedOffset, NaiveDate};

use super::entry::TimelineEntry;
use super::timeline::MessagePipeline;

/// Consecutive entries sharing a calendar date
#[derive(Debug, Clone, PartialEq)]
pub struct DayGroup<'a> {
    pub date: NaiveDate,
    pub entries: Vec<&'a TimelineEntry>,
}

impl MessagePipeline {
    /// Group the timeline by calendar date in `offset`
    ///
    /// Groups follow timeline order, so a date can only repeat when pending
    /// entries straddle midnight.
    pub fn group_by_day(&self, offset: FixedOffset) -> Vec<DayGroup<'_>> {
        let mut groups: Vec<DayGroup<'_>> = Vec::new();
        for entry in self.entries() {
            let date = entry.created_at.with_timezone(&offset).date_naive();
            match groups.last_mut() {
                Some(group) if group.date == date => group.entries.push(entry),
                _ => groups.push(DayGroup {
                    date,
                    entries: vec![entry],
                }),
            }
        }
        groups
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chat_core::{Message, Reactions, Snowflake};
    use chrono::{DateTime, Utc};

    use super::*;
    use crate::pipeline::PipelineEvent;

    fn message(id: i64, seq: u64, at: &str) -> Message {
        Message {
            id: Snowflake::new(id),
            seq,
            conversation_id: Snowflake::new(100),
            sender_id: Snowflake::new(2),
            sender_name: "Grace".to_string(),
            content: format!("message {id}"),
            attachments: Vec::new(),
            created_at: at.parse::<DateTime<Utc>>().unwrap(),
            edited_at: None,
            is_deleted: false,
            reactions: Reactions::new(),
            reply_to: None,
            temp_id: None,
        }
    }

    fn pipeline() -> MessagePipeline {
        let mut pipeline = MessagePipeline::new(
            Snowflake::new(100),
            false,
            Snowflake::new(1),
            Duration::from_secs(10),
        );
        pipeline.apply(PipelineEvent::Snapshot(vec![
            message(1, 1, "2024-03-01T10:00:00Z"),
            message(2, 2, "2024-03-01T23:30:00Z"),
            message(3, 3, "2024-03-02T00:30:00Z"),
        ]));
        pipeline
    }

    #[test]
    fn test_groups_split_at_utc_midnight() {
        let utc = FixedOffset::east_opt(0).unwrap();
        let pipeline = pipeline();
        let groups = pipeline.group_by_day(utc);

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].date, NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());
        assert_eq!(groups[0].entries.len(), 2);
        assert_eq!(groups[1].entries.len(), 1);
    }

    #[test]
    fn test_offset_moves_day_boundary() {
        let west = FixedOffset::west_opt(2 * 3600).unwrap();
        let pipeline = pipeline();
        let groups = pipeline.group_by_day(west);

        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].entries.len(), 3);
    }

    #[test]
    fn test_empty_timeline_has_no_groups() {
        let pipeline = MessagePipeline::new(
            Snowflake::new(100),
            false,
            Snowflake::new(1),
            Duration::from_secs(10),
        );
        assert!(pipeline.group_by_day(FixedOffset::east_opt(0).unwrap()).is_empty());
    }
}
