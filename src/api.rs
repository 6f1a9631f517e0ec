use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::Url;
use serde_json::json;

use crate::error::TransportError;
use crate::proxy::HttpClients;

const TWEET_ENDPOINT: &str =
    "https://api.x.com/graphql/WvlrBJ2bz8AuwoszWyie8A/TweetResultByRestId";

#[derive(Debug)]
pub(crate) struct ApiResponse {
    pub(crate) status: u16,
    pub(crate) body: String,
}

/// Transport for the single-tweet GraphQL query.
#[async_trait]
pub(crate) trait TweetApi: Send + Sync {
    async fn get_tweet(
        &self,
        tweet_id: &str,
        headers: HeaderMap,
    ) -> Result<ApiResponse, TransportError>;
}

pub(crate) struct HttpTweetApi {
    clients: Arc<HttpClients>,
}

impl HttpTweetApi {
    pub(crate) fn new(clients: Arc<HttpClients>) -> Self {
        Self { clients }
    }
}

#[async_trait]
impl TweetApi for HttpTweetApi {
    async fn get_tweet(
        &self,
        tweet_id: &str,
        headers: HeaderMap,
    ) -> Result<ApiResponse, TransportError> {
        let url = tweet_url(tweet_id)?;
        let response = self.clients.next()?.get(url).headers(headers).send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok(ApiResponse { status, body })
    }
}

pub(crate) fn tweet_url(tweet_id: &str) -> Result<Url, TransportError> {
    let variables = json!({
        "tweetId": tweet_id,
        "includePromotedContent": true,
        "withBirdwatchNotes": true,
        "withVoice": true,
        "withCommunity": true,
    });
    let features = json!({
        "creator_subscriptions_tweet_preview_api_enabled": true,
        "premium_content_api_read_enabled": false,
        "communities_web_enable_tweet_community_results_fetch": true,
        "c9s_tweet_anatomy_moderator_badge_enabled": true,
        "responsive_web_grok_analyze_button_fetch_trends_enabled": false,
        "responsive_web_grok_analyze_post_followups_enabled": false,
        "responsive_web_jetfuel_frame": true,
        "responsive_web_grok_share_attachment_enabled": true,
        "articles_preview_enabled": true,
        "responsive_web_edit_tweet_api_enabled": true,
        "graphql_is_translatable_rweb_tweet_is_translatable_enabled": true,
        "view_counts_everywhere_api_enabled": true,
        "longform_notetweets_consumption_enabled": true,
        "responsive_web_twitter_article_tweet_consumption_enabled": true,
        "tweet_awards_web_tipping_enabled": false,
        "responsive_web_grok_show_grok_translated_post": false,
        "responsive_web_grok_analysis_button_from_backend": true,
        "creator_subscriptions_quote_tweet_preview_enabled": false,
        "freedom_of_speech_not_reach_fetch_enabled": true,
        "standardized_nudges_misinfo": true,
        "tweet_with_visibility_results_prefer_gql_limited_actions_policy_enabled": true,
        "longform_notetweets_rich_text_read_enabled": true,
        "longform_notetweets_inline_media_enabled": true,
        "payments_enabled": false,
        "profile_label_improvements_pcf_label_in_post_enabled": true,
        "responsive_web_profile_redirect_enabled": false,
        "rweb_tipjar_consumption_enabled": true,
        "verified_phone_label_enabled": true,
        "responsive_web_grok_image_annotation_enabled": true,
        "responsive_web_grok_imagine_annotation_enabled": true,
        "responsive_web_grok_community_note_auto_translation_is_enabled": false,
        "responsive_web_graphql_skip_user_profile_image_extensions_enabled": false,
        "responsive_web_graphql_timeline_navigation_enabled": true,
        "responsive_web_enhance_cards_enabled": false,
    });
    let field_toggles = json!({
        "withArticleRichContentState": true,
        "withArticlePlainText": false,
    });

    Url::parse_with_params(
        TWEET_ENDPOINT,
        &[
            ("variables", variables.to_string()),
            ("features", features.to_string()),
            ("fieldToggles", field_toggles.to_string()),
        ],
    )
    .map_err(|e| TransportError::Other(e.to_string()))
}
