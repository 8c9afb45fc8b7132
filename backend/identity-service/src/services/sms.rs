/// SMS delivery of verification codes through AWS SNS
use crate::config::SmsSettings;
use crate::error::{IdentityError, Result};
use crate::services::delivery::{Deliverer, VerificationNotice};
use crate::validators::mask_phone;
use async_trait::async_trait;
use aws_sdk_sns::types::MessageAttributeValue;
use aws_sdk_sns::Client as SnsClient;
use tracing::{error, info, warn};

/// SNS wrapper; without a client it only logs
#[derive(Clone)]
pub struct SmsService {
    sns_client: Option<SnsClient>,
    sender_id: Option<String>,
}

impl SmsService {
    pub fn new(sns_client: Option<SnsClient>, sender_id: Option<String>) -> Self {
        Self {
            sns_client,
            sender_id,
        }
    }

    /// Build the SNS client from the ambient AWS configuration when a region is set
    pub async fn from_settings(settings: &SmsSettings) -> Self {
        let sns_client = match &settings.aws_region {
            Some(region) => {
                let config = aws_config::defaults(aws_config::BehaviorVersion::latest())
                    .region(aws_config::Region::new(region.clone()))
                    .load()
                    .await;
                info!(region = %region, "SNS client initialized for SMS delivery");
                Some(SnsClient::new(&config))
            }
            None => {
                warn!("AWS_REGION not set; SMS service will operate in no-op mode");
                None
            }
        };

        Self::new(sns_client, settings.sender_id.clone())
    }

    pub fn is_enabled(&self) -> bool {
        self.sns_client.is_some()
    }

    fn compose(notice: &VerificationNotice) -> String {
        format!(
            "Your verification code is: {}. This code expires in {} minutes.",
            notice.code,
            notice.expires_in_minutes()
        )
    }

    fn string_attribute(value: &str) -> Result<MessageAttributeValue> {
        MessageAttributeValue::builder()
            .data_type("String")
            .string_value(value)
            .build()
            .map_err(|e| IdentityError::Internal(format!("Failed to build SMS attribute: {}", e)))
    }

    async fn send_sms(&self, phone_number: &str, message: &str) -> Result<()> {
        let Some(sns) = &self.sns_client else {
            // Development mode: Log instead of sending SMS
            warn!(
                phone = %mask_phone(phone_number),
                "SMS service not configured - message not sent"
            );
            return Ok(());
        };

        let mut request = sns
            .publish()
            .phone_number(phone_number)
            .message(message)
            .message_attributes("AWS.SNS.SMS.SMSType", Self::string_attribute("Transactional")?);
        if let Some(sender_id) = &self.sender_id {
            request = request
                .message_attributes("AWS.SNS.SMS.SenderID", Self::string_attribute(sender_id)?);
        }

        match request.send().await {
            Ok(output) => {
                info!(
                    phone = %mask_phone(phone_number),
                    message_id = ?output.message_id(),
                    "SMS sent successfully"
                );
                Ok(())
            }
            Err(e) => {
                error!(
                    phone = %mask_phone(phone_number),
                    error = %e,
                    "Failed to send SMS"
                );
                Err(IdentityError::Delivery(format!("Failed to send SMS: {}", e)))
            }
        }
    }
}

#[async_trait]
impl Deliverer for SmsService {
    async fn deliver(&self, notice: &VerificationNotice) -> Result<()> {
        self.send_sms(&notice.identifier, &Self::compose(notice))
            .await
    }
}
