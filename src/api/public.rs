use rocket::{serde::json::Json, Route, State};

use crate::{error::Result, model::api::candidate::CandidateDescription, store::Stores};

pub fn routes() -> Vec<Route> {
    routes![candidates]
}

/// Everyone may see who is standing, but not how they are doing.
#[get("/candidates")]
pub async fn candidates(stores: &State<Stores>) -> Result<Json<Vec<CandidateDescription>>> {
    let candidates = stores
        .candidates
        .list()
        .await?
        .into_iter()
        .map(CandidateDescription::from)
        .collect();
    Ok(Json(candidates))
}

#[cfg(test)]
mod tests {
    use rocket::{http::Status, local::asynchronous::Client, serde::json::serde_json::Value};

    use super::*;
    use crate::model::db::CandidateSpec;
    use crate::TestBackend;

    #[backend_test]
    async fn no_candidates(client: Client) {
        let response = client.get(uri!(candidates)).dispatch().await;

        assert_eq!(Status::Ok, response.status());
        let candidates: Vec<CandidateDescription> = response.into_json().await.unwrap();
        assert!(candidates.is_empty());
    }

    #[backend_test]
    async fn candidates_hide_tallies(client: Client, backend: TestBackend) {
        let first = backend
            .stores
            .candidates
            .create(CandidateSpec::example())
            .await
            .unwrap();
        let second = backend
            .stores
            .candidates
            .create(CandidateSpec::example2())
            .await
            .unwrap();
        backend.stores.candidates.increment_vote(first.id).await.unwrap();

        let response = client.get(uri!(candidates)).dispatch().await;
        assert_eq!(Status::Ok, response.status());

        let body: Value = response.into_json().await.unwrap();
        let listed = body.as_array().unwrap();
        assert_eq!(listed.len(), 2);
        assert!(listed.iter().all(|c| c.get("vote_count").is_none()));

        let listed: Vec<CandidateDescription> =
            rocket::serde::json::serde_json::from_value(body).unwrap();
        assert_eq!(
            listed,
            vec![
                CandidateDescription::from(first),
                CandidateDescription::from(second)
            ]
        );
    }
}
