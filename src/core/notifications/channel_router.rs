// Channel routing - which channels does an event go to?
//
// Category assignment is a static table. Resolution walks every active
// community config and keeps the ones that mapped a channel for the category.

use super::dispatcher::{NotificationError, NotificationStore};
use super::notification_models::{CommunityChannelConfig, EventCategory, EventKind};

/// One place a message will be delivered to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Destination {
    pub community_id: u64,
    pub channel_id: u64,
}

/// Static category table.
pub fn classify(kind: EventKind) -> EventCategory {
    match kind {
        EventKind::CommentPosted | EventKind::CommentEdited => EventCategory::PrimaryActivity,
        EventKind::VoteCast => EventCategory::Engagement,
        EventKind::CommentReported
        | EventKind::UserWarned
        | EventKind::UserMuted
        | EventKind::UserUnmuted
        | EventKind::UserBanned
        | EventKind::UserShadowBanned
        | EventKind::UserUnbanned
        | EventKind::UserAutoMuted
        | EventKind::UserAutoBanned
        | EventKind::UserPromoted
        | EventKind::UserDemoted
        | EventKind::CommentPinned
        | EventKind::CommentUnpinned
        | EventKind::CommentLocked
        | EventKind::CommentUnlocked
        | EventKind::CommentDeleted => EventCategory::Moderation,
    }
}

/// Pick destinations out of a set of configs. Inactive configs and
/// communities without a channel for `category` are skipped.
pub fn route(configs: &[CommunityChannelConfig], category: EventCategory) -> Vec<Destination> {
    configs
        .iter()
        .filter(|config| config.active)
        .filter_map(|config| {
            config
                .channels
                .get(&category)
                .map(|&channel_id| Destination {
                    community_id: config.community_id,
                    channel_id,
                })
        })
        .collect()
}

/// Load the current configs and route `category` through them.
pub async fn resolve<S: NotificationStore + ?Sized>(
    store: &S,
    category: EventCategory,
) -> Result<Vec<Destination>, NotificationError> {
    let configs = store.get_channel_configs().await?;
    Ok(route(&configs, category))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn config(
        community_id: u64,
        active: bool,
        channels: &[(EventCategory, u64)],
    ) -> CommunityChannelConfig {
        CommunityChannelConfig {
            community_id,
            channels: channels.iter().copied().collect::<BTreeMap<_, _>>(),
            active,
        }
    }

    #[test]
    fn classification_is_static() {
        assert_eq!(
            classify(EventKind::CommentPosted),
            EventCategory::PrimaryActivity
        );
        assert_eq!(
            classify(EventKind::CommentEdited),
            EventCategory::PrimaryActivity
        );
        assert_eq!(classify(EventKind::VoteCast), EventCategory::Engagement);
        assert_eq!(
            classify(EventKind::CommentReported),
            EventCategory::Moderation
        );
        assert_eq!(
            classify(EventKind::UserAutoBanned),
            EventCategory::Moderation
        );
    }

    #[test]
    fn only_active_configs_with_a_mapping_are_routed() {
        let configs = vec![
            config(
                1,
                true,
                &[
                    (EventCategory::Moderation, 10),
                    (EventCategory::Engagement, 11),
                ],
            ),
            config(2, true, &[(EventCategory::Engagement, 21)]),
            config(3, false, &[(EventCategory::Moderation, 30)]),
            config(4, true, &[(EventCategory::Moderation, 40)]),
        ];

        let moderation = route(&configs, EventCategory::Moderation);
        assert_eq!(
            moderation,
            vec![
                Destination { community_id: 1, channel_id: 10 },
                Destination { community_id: 4, channel_id: 40 },
            ]
        );

        assert_eq!(route(&configs, EventCategory::Engagement).len(), 2);
        assert!(route(&configs, EventCategory::PrimaryActivity).is_empty());
    }
}
