use async_trait::async_trait;
use aws_sdk_apigatewaymanagement::error::SdkError as ApiGatewaySdkError;
use aws_sdk_apigatewaymanagement::primitives::Blob;
use aws_sdk_apigatewaymanagement::Client as ApiGatewayClient;
use aws_sdk_dynamodb::types::AttributeValue;
use aws_sdk_dynamodb::Client as DynamoDbClient;
use tracing::{debug, info};

use crate::repositories::errors::connection_repository_errors::ConnectionRepositoryError;

#[cfg(test)]
use mockall::automock;

/// Live WebSocket connections of a user, as registered by the WebSocket gateway.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ConnectionRepository: Send + Sync {
    async fn get_connection_ids(
        &self,
        user_id: &str,
    ) -> Result<Vec<String>, ConnectionRepositoryError>;

    async fn remove_connection(
        &self,
        user_id: &str,
        connection_id: &str,
    ) -> Result<(), ConnectionRepositoryError>;

    async fn send_message(
        &self,
        connection_id: &str,
        message: &str,
    ) -> Result<(), ConnectionRepositoryError>;
}

pub struct DynamoDbConnectionRepository {
    dynamodb_client: DynamoDbClient,
    api_gateway_client: ApiGatewayClient,
    table_name: String,
}

impl DynamoDbConnectionRepository {
    pub fn new(
        dynamodb_client: DynamoDbClient,
        api_gateway_client: ApiGatewayClient,
        table_name: &str,
    ) -> Self {
        Self {
            dynamodb_client,
            api_gateway_client,
            table_name: table_name.to_string(),
        }
    }

    /// Management API client pointed at the WebSocket stage,
    /// e.g. `https://{api-id}.execute-api.{region}.amazonaws.com/{stage}`.
    pub fn api_gateway_client(
        config: &aws_config::SdkConfig,
        endpoint: &str,
    ) -> ApiGatewayClient {
        let api_gateway_config = aws_sdk_apigatewaymanagement::config::Builder::from(config)
            .endpoint_url(endpoint)
            .build();
        ApiGatewayClient::from_conf(api_gateway_config)
    }
}

#[async_trait]
impl ConnectionRepository for DynamoDbConnectionRepository {
    async fn get_connection_ids(
        &self,
        user_id: &str,
    ) -> Result<Vec<String>, ConnectionRepositoryError> {
        let output = self
            .dynamodb_client
            .query()
            .table_name(&self.table_name)
            .key_condition_expression("user_id = :user_id")
            .expression_attribute_values(":user_id", AttributeValue::S(user_id.to_string()))
            .projection_expression("connection_id")
            .send()
            .await
            .map_err(|e| ConnectionRepositoryError::DynamoDb(e.to_string()))?;

        let connection_ids = output
            .items
            .unwrap_or_default()
            .into_iter()
            .filter_map(|item| match item.get("connection_id") {
                Some(AttributeValue::S(connection_id)) => Some(connection_id.clone()),
                _ => None,
            })
            .collect();

        Ok(connection_ids)
    }

    async fn remove_connection(
        &self,
        user_id: &str,
        connection_id: &str,
    ) -> Result<(), ConnectionRepositoryError> {
        self.dynamodb_client
            .delete_item()
            .table_name(&self.table_name)
            .key("user_id", AttributeValue::S(user_id.to_string()))
            .key("connection_id", AttributeValue::S(connection_id.to_string()))
            .send()
            .await
            .map_err(|e| ConnectionRepositoryError::DynamoDb(e.to_string()))?;

        info!("Removed stale connection {} for user {}", connection_id, user_id);
        Ok(())
    }

    async fn send_message(
        &self,
        connection_id: &str,
        message: &str,
    ) -> Result<(), ConnectionRepositoryError> {
        let result = self
            .api_gateway_client
            .post_to_connection()
            .connection_id(connection_id)
            .data(Blob::new(message.as_bytes()))
            .send()
            .await;

        match result {
            Ok(_) => {
                debug!("Sent message to connection: {}", connection_id);
                Ok(())
            }
            Err(ApiGatewaySdkError::ServiceError(service_err))
                if service_err.err().is_gone_exception() =>
            {
                Err(ConnectionRepositoryError::Gone(connection_id.to_string()))
            }
            Err(e) => Err(ConnectionRepositoryError::ApiGateway(e.to_string())),
        }
    }
}
