// config.rs
use std::env;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub jwt_secret: String,
    pub host: String,
    pub port: u16,
    pub mpesa: Option<MpesaConfig>,
}

#[derive(Debug, Clone)]
pub struct MpesaConfig {
    pub consumer_key: String,
    pub consumer_secret: String,
    pub short_code: String,
    pub passkey: String,
    pub callback_url: String,
    pub callback_secret: String,
    pub environment: String,
}

impl AppConfig {
    pub fn from_env() -> Self {
        AppConfig {
            database_url: env::var("DATABASE_URL").expect("DATABASE_URL must be set"),
            jwt_secret: env::var("JWT_SECRET").expect("JWT_SECRET must be set"),
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .expect("PORT must be a number"),
            mpesa: MpesaConfig::from_env(),
        }
    }
}

impl MpesaConfig {
    /// Returns `None` when any required M-Pesa variable is missing, in which
    /// case mobile-money payments stay disabled and the rest of the API runs
    /// normally.
    pub fn from_env() -> Option<Self> {
        let required = [
            "MPESA_CONSUMER_KEY",
            "MPESA_CONSUMER_SECRET",
            "MPESA_SHORT_CODE",
            "MPESA_PASSKEY",
            "MPESA_CALLBACK_URL",
            "MPESA_CALLBACK_SECRET",
        ];
        for name in required {
            if env::var(name).is_err() {
                tracing::warn!("{} not set, M-Pesa service disabled", name);
                return None;
            }
        }

        Some(MpesaConfig {
            consumer_key: env::var("MPESA_CONSUMER_KEY").ok()?,
            consumer_secret: env::var("MPESA_CONSUMER_SECRET").ok()?,
            short_code: env::var("MPESA_SHORT_CODE").ok()?,
            passkey: env::var("MPESA_PASSKEY").ok()?,
            callback_url: env::var("MPESA_CALLBACK_URL").ok()?,
            callback_secret: env::var("MPESA_CALLBACK_SECRET").ok()?,
            environment: env::var("MPESA_ENVIRONMENT").unwrap_or_else(|_| "sandbox".to_string()),
        })
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    pub fn urls(&self) -> (String, String) {
        let base_url = if self.is_production() {
            "https://api.safaricom.co.ke"
        } else {
            "https://sandbox.safaricom.co.ke"
        };

        let auth_url = format!("{}/oauth/v1/generate?grant_type=client_credentials", base_url);
        let stk_url = format!("{}/mpesa/stkpush/v1/processrequest", base_url);

        (auth_url, stk_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(environment: &str) -> MpesaConfig {
        MpesaConfig {
            consumer_key: "key".to_string(),
            consumer_secret: "secret".to_string(),
            short_code: "174379".to_string(),
            passkey: "passkey".to_string(),
            callback_url: "https://example.com/api/payments/mpesa/callback".to_string(),
            callback_secret: "cb-secret".to_string(),
            environment: environment.to_string(),
        }
    }

    #[test]
    fn sandbox_urls_by_default() {
        let (auth_url, stk_url) = sample("sandbox").urls();
        assert!(auth_url.starts_with("https://sandbox.safaricom.co.ke/oauth"));
        assert!(stk_url.starts_with("https://sandbox.safaricom.co.ke/mpesa/stkpush"));
    }

    #[test]
    fn production_urls_when_configured() {
        let config = sample("production");
        assert!(config.is_production());
        let (auth_url, _) = config.urls();
        assert!(auth_url.starts_with("https://api.safaricom.co.ke/"));
    }
}
