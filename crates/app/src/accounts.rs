use axum::{
    extract::{Query, State},
    response::{IntoResponse, Response},
    Form,
};
use axum_extra::extract::cookie::CookieJar;
use metrics::counter;
use serde::Deserialize;
use tokio::task;
use tracing::{info, warn};
use yatube_core::{
    forms::{
        validate_login, validate_signup, FieldErrors, LoginFormInput, SignupFormInput,
        MSG_BAD_CREDENTIALS, MSG_USERNAME_TAKEN, NON_FIELD,
    },
    User,
};
use yatube_storage::{NewUser, UserError};

use crate::auth::{hash_password, removal_cookie, safe_next, verify_password, CurrentUser};
use crate::error::{redirect_found, AppError};
use crate::router::AppState;
use crate::templates::{render, LoggedOutTemplate, LoginTemplate, SignupFormView, SignupTemplate};

#[derive(Debug, Default, Deserialize)]
pub struct LoginQuery {
    #[serde(default)]
    pub next: Option<String>,
}

/// Attaches a fresh session cookie to a redirect.
fn signed_in(
    state: &AppState,
    jar: CookieJar,
    user: &User,
    target: &str,
) -> Result<Response, AppError> {
    let token = state.sessions().issue(user.id, state.now())?;
    let jar = jar.add(state.sessions().cookie(token));
    Ok((jar, redirect_found(target)).into_response())
}

pub async fn signup_form(CurrentUser(viewer): CurrentUser) -> Result<Response, AppError> {
    Ok(render(&SignupTemplate {
        viewer,
        form: SignupFormView::default(),
    })?
    .into_response())
}

pub async fn signup(
    State(state): State<AppState>,
    jar: CookieJar,
    Form(input): Form<SignupFormInput>,
) -> Result<Response, AppError> {
    let draft = match validate_signup(&input) {
        Ok(draft) => draft,
        Err(errors) => return rejected_signup(&input, &errors),
    };

    let password = draft.password.clone();
    let password_hash = task::spawn_blocking(move || hash_password(&password))
        .await
        .map_err(|err| AppError::Internal(err.to_string()))??;

    let created = state
        .storage()
        .users()
        .create(&NewUser {
            username: &draft.username,
            first_name: &draft.first_name,
            last_name: &draft.last_name,
            password_hash: &password_hash,
            date_joined: state.now(),
        })
        .await;
    let user = match created {
        Ok(user) => user,
        Err(UserError::UsernameTaken) => {
            let mut errors = FieldErrors::new();
            errors.add("username", MSG_USERNAME_TAKEN);
            return rejected_signup(&input, &errors);
        }
        Err(err) => return Err(err.into()),
    };

    info!(stage = "auth", user = %user, "account created");
    signed_in(&state, jar, &user, "/")
}

fn rejected_signup(input: &SignupFormInput, errors: &FieldErrors) -> Result<Response, AppError> {
    Ok(render(&SignupTemplate {
        viewer: None,
        form: SignupFormView::rejected(input, errors),
    })?
    .into_response())
}

pub async fn login_form(
    CurrentUser(viewer): CurrentUser,
    Query(query): Query<LoginQuery>,
) -> Result<Response, AppError> {
    Ok(render(&LoginTemplate {
        viewer,
        username: String::new(),
        next: query.next.unwrap_or_default(),
        errors: Vec::new(),
    })?
    .into_response())
}

pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    Form(input): Form<LoginFormInput>,
) -> Result<Response, AppError> {
    if let Err(errors) = validate_login(&input) {
        return Ok(render(&LoginTemplate::with_errors(&input.username, &input.next, &errors))?
            .into_response());
    }

    let credentials = state
        .storage()
        .users()
        .fetch_credentials(input.username.trim())
        .await?;
    let authenticated = match credentials {
        Some((user, password_hash)) => {
            let password = input.password.clone();
            let matches =
                task::spawn_blocking(move || verify_password(&password, &password_hash))
                    .await
                    .map_err(|err| AppError::Internal(err.to_string()))??;
            matches.then_some(user)
        }
        None => None,
    };

    let Some(user) = authenticated else {
        counter!("auth_logins_total", "result" => "failure").increment(1);
        warn!(stage = "auth", username = %input.username, "login rejected");
        let mut errors = FieldErrors::new();
        errors.add(NON_FIELD, MSG_BAD_CREDENTIALS);
        return Ok(render(&LoginTemplate::with_errors(&input.username, &input.next, &errors))?
            .into_response());
    };

    counter!("auth_logins_total", "result" => "success").increment(1);
    info!(stage = "auth", user = %user, "signed in");
    let target = safe_next(&input.next).unwrap_or("/");
    signed_in(&state, jar, &user, target)
}

pub async fn logout(jar: CookieJar) -> Result<Response, AppError> {
    let page = render(&LoggedOutTemplate { viewer: None })?;
    Ok((jar.remove(removal_cookie()), page).into_response())
}

#[cfg(test)]
mod tests {
    use axum::http::{header, StatusCode};

    use crate::auth::SESSION_COOKIE;
    use crate::test_support::{body_text, location, TestContext};

    fn session_from(response: &axum::response::Response) -> Option<String> {
        response
            .headers()
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .find(|value| value.starts_with(&format!("{SESSION_COOKIE}=")))
            .map(|value| value.split(';').next().unwrap_or_default().to_string())
    }

    #[tokio::test]
    async fn signup_creates_account_and_signs_in() {
        let ctx = TestContext::new().await;
        let response = ctx
            .post_form(
                "/auth/signup/",
                None,
                &[
                    ("first_name", "Leo"),
                    ("last_name", "Tolstoy"),
                    ("username", "leo"),
                    ("password1", "war-and-peace"),
                    ("password2", "war-and-peace"),
                ],
            )
            .await;
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(location(&response), "/");
        let cookie = session_from(&response).expect("session cookie");

        let user = ctx
            .state
            .storage()
            .users()
            .find_by_username("leo")
            .await
            .expect("lookup")
            .expect("user exists");
        assert_eq!(user.full_name(), "Leo Tolstoy");

        let page = body_text(ctx.get_with_cookie("/follow/", &cookie).await).await;
        assert!(page.contains("Signed in as leo"));
    }

    #[tokio::test]
    async fn signup_rejects_duplicates_and_mismatches() {
        let ctx = TestContext::new().await;
        ctx.create_user("leo").await;

        let taken = ctx
            .post_form(
                "/auth/signup/",
                None,
                &[
                    ("username", "leo"),
                    ("password1", "war-and-peace"),
                    ("password2", "war-and-peace"),
                ],
            )
            .await;
        assert_eq!(taken.status(), StatusCode::OK);
        assert!(body_text(taken).await.contains("already exists"));

        let mismatch = ctx
            .post_form(
                "/auth/signup/",
                None,
                &[
                    ("username", "mia"),
                    ("password1", "first-secret"),
                    ("password2", "second-secret"),
                ],
            )
            .await;
        assert_eq!(mismatch.status(), StatusCode::OK);
        assert!(session_from(&mismatch).is_none());
        assert!(ctx
            .state
            .storage()
            .users()
            .find_by_username("mia")
            .await
            .expect("lookup")
            .is_none());
    }

    #[tokio::test]
    async fn login_honours_local_next() {
        let ctx = TestContext::new().await;
        ctx.create_user_with_password("leo", "war-and-peace").await;

        let form = body_text(ctx.get("/auth/login/?next=/create/", None).await).await;
        assert!(form.contains(r#"name="next""#));

        let response = ctx
            .post_form(
                "/auth/login/",
                None,
                &[
                    ("username", "leo"),
                    ("password", "war-and-peace"),
                    ("next", "/create/"),
                ],
            )
            .await;
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(location(&response), "/create/");
        let cookie = session_from(&response).expect("session cookie");

        let create = ctx.get_with_cookie("/create/", &cookie).await;
        assert_eq!(create.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn login_ignores_external_next() {
        let ctx = TestContext::new().await;
        ctx.create_user_with_password("leo", "war-and-peace").await;

        let response = ctx
            .post_form(
                "/auth/login/",
                None,
                &[
                    ("username", "leo"),
                    ("password", "war-and-peace"),
                    ("next", "//evil.test/"),
                ],
            )
            .await;
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(location(&response), "/");
    }

    #[tokio::test]
    async fn wrong_password_rerenders_form() {
        let ctx = TestContext::new().await;
        ctx.create_user_with_password("leo", "war-and-peace").await;

        let response = ctx
            .post_form(
                "/auth/login/",
                None,
                &[("username", "leo"), ("password", "guess-work")],
            )
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(session_from(&response).is_none());
        assert!(body_text(response)
            .await
            .contains("Please enter a correct username and password."));
    }

    #[tokio::test]
    async fn logout_clears_session_cookie() {
        let ctx = TestContext::new().await;
        let user = ctx.create_user("leo").await;

        let response = ctx.get("/auth/logout/", Some(&user)).await;
        assert_eq!(response.status(), StatusCode::OK);
        let cleared = response
            .headers()
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .any(|value| value.starts_with(&format!("{SESSION_COOKIE}=;")));
        assert!(cleared);
        assert!(body_text(response).await.contains("You have logged out"));
    }

    #[tokio::test]
    async fn tampered_session_is_treated_as_guest() {
        let ctx = TestContext::new().await;
        let user = ctx.create_user("leo").await;
        let cookie = ctx.session_cookie(&user);
        let forged = format!("{}0", cookie);

        let response = ctx.get_with_cookie("/create/", &forged).await;
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(location(&response), "/auth/login/?next=/create/");
    }
}
