use tracing::{debug, info};

use crate::{
    error::StoreError,
    models::{channel::ChannelType, event::EventType, preference::DefaultPreference},
    store::PreferenceWriter,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionedPreference {
    pub event_type: EventType,
    pub preference_id: i64,
    pub rule_registered: bool,
}

/// Seeds one default preference row per event type for a newly connected channel. For bot
/// channels the bot is then wired to each row as a separate, explicit write.
pub async fn provision_default_preferences(
    writer: &dyn PreferenceWriter,
    tenant_config_id: i64,
    channel: &str,
    event_types: &[EventType],
    bot_config_id: Option<i64>,
) -> Result<Vec<ProvisionedPreference>, StoreError> {
    let channel: ChannelType = channel.parse()?;
    let bot_config_id = bot_config_id.filter(|_| channel.is_bot_channel());

    let mut provisioned = Vec::with_capacity(event_types.len());

    for &event_type in event_types {
        let preference_id = writer
            .create_default_preference(&DefaultPreference {
                tenant_config_id,
                channel,
                event_type,
            })
            .await?;

        let rule_registered = match bot_config_id {
            Some(bot_config_id) => {
                writer
                    .register_delivery_rule(bot_config_id, preference_id)
                    .await?;
                true
            }
            None => false,
        };

        debug!(
            tenant_config_id,
            channel = %channel,
            event_type = %event_type,
            preference_id,
            rule_registered,
            "Provisioned default preference"
        );

        provisioned.push(ProvisionedPreference {
            event_type,
            preference_id,
            rule_registered,
        });
    }

    info!(
        tenant_config_id,
        channel = %channel,
        count = provisioned.len(),
        "Default preferences provisioned"
    );

    Ok(provisioned)
}
