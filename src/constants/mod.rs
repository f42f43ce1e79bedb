pub struct Env {
    pub database_url: String,
    pub jwt_secret: String,
    pub access_token_expiration: u64,
    pub reset_token_expiration: u64,
    pub storage_dir: String,
    pub storage_base_url: String,
}

impl Env {
    fn new() -> Self {
        dotenvy::dotenv().ok();

        let database_url = std::env::var("DATABASE_URL")
            .expect("DATABASE_URL must be set in .env file or environment variable");
        let jwt_secret = std::env::var("SECRET_KEY")
            .expect("SECRET_KEY must be set in .env file or environment variable");

        let access_token_expiration = std::env::var("ACCESS_TOKEN_EXPIRATION")
            .unwrap_or_else(|_| "900".to_string())
            .parse::<u64>()
            .expect("ACCESS_TOKEN_EXPIRATION must be a valid u64 integer");
        let reset_token_expiration = std::env::var("RESET_TOKEN_EXPIRATION")
            .unwrap_or_else(|_| "3600".to_string())
            .parse::<u64>()
            .expect("RESET_TOKEN_EXPIRATION must be a valid u64 integer");

        let storage_dir =
            std::env::var("STORAGE_DIR").unwrap_or_else(|_| "./storage".to_string());
        let storage_base_url = std::env::var("STORAGE_BASE_URL")
            .unwrap_or_else(|_| "http://localhost:8080/storage".to_string());

        Env {
            database_url,
            jwt_secret,
            access_token_expiration,
            reset_token_expiration,
            storage_dir,
            storage_base_url,
        }
    }
}

impl Default for Env {
    fn default() -> Self {
        Self::new()
    }
}
