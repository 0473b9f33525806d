use crate::error::ProviderError;
use reqwest::cookie::{CookieStore, Jar};
use reqwest::{Client, Response, Url};
use scraper::{Html, Selector};

/// Where the login replay currently stands. `Failed` is reachable from every
/// other state; `SessionEstablished` is the only usable terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    SamlRedirectReceived,
    LoginFormSubmitted,
    IdpRedirectFormReceived,
    RedirectSubmitted,
    SessionEstablished,
    Failed,
}

/// An HTML form lifted out of a scraped page: its resolved action URL plus
/// every named input that carried a non-empty value (hidden CSRF and state
/// tokens included). Field order and duplicate names are preserved because
/// some portals key multiple values on one name.
#[derive(Debug, Clone, PartialEq)]
pub struct HtmlForm {
    pub action: String,
    pub fields: Vec<(String, String)>,
}

impl HtmlForm {
    /// Extracts the first form matching `form_selector`. A missing form or a
    /// form without an action is a parse failure; a path-relative action is
    /// resolved against the scheme and host of the page it came from.
    pub fn parse(html: &str, form_selector: &str, page_url: &Url) -> Result<Self, ProviderError> {
        let document = Html::parse_document(html);
        let selector = Selector::parse(form_selector)
            .map_err(|_| ProviderError::parse(format!("bad form selector: {form_selector}")))?;
        let form = document
            .select(&selector)
            .next()
            .ok_or_else(|| ProviderError::parse(format!("no form matching {form_selector}")))?;

        let action = form
            .value()
            .attr("action")
            .ok_or_else(|| ProviderError::parse("form has no action"))?;
        let action = if action.starts_with('/') {
            let host = page_url
                .host_str()
                .ok_or_else(|| ProviderError::parse("page url has no host"))?;
            format!("{}://{}{}", page_url.scheme(), host, action)
        } else {
            action.to_string()
        };

        let input_selector = Selector::parse("input")
            .map_err(|_| ProviderError::parse("bad input selector"))?;
        let mut fields = Vec::new();
        for input in form.select(&input_selector) {
            if let (Some(name), Some(value)) =
                (input.value().attr("name"), input.value().attr("value"))
            {
                if !value.is_empty() {
                    fields.push((name.to_string(), value.to_string()));
                }
            }
        }

        Ok(Self { action, fields })
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.fields.iter().any(|(n, _)| n == name)
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.fields.push((name.into(), value.into()));
    }

    /// POSTs the form verbatim to its action URL.
    pub async fn submit(&self, client: &Client) -> Result<Response, reqwest::Error> {
        client.post(&self.action).form(&self.fields).send().await
    }
}

/// The provider-specific knobs of one SAML redirect login.
pub struct SamlLogin {
    /// SSO entry URL; fetching it lands on the identity provider's login form.
    pub entry_url: String,
    /// Selector for the login form on the IdP page.
    pub form_selector: &'static str,
    pub username_field: &'static str,
    pub password_field: &'static str,
    /// Cookie that proves the session took, checked against the final
    /// redirect target.
    pub session_cookie: String,
}

/// Replays the browser SSO redirect chain: entry page, credential POST, IdP
/// auto-submit form, final redirect POST, session-cookie check. Runs once per
/// adapter construction and is never retried.
pub async fn saml_login(
    client: &Client,
    jar: &Jar,
    login: &SamlLogin,
    username: &str,
    password: &str,
) -> Result<(), ProviderError> {
    let mut state = SessionState::Unauthenticated;
    tracing::debug!(?state, "starting SSO login at {}", login.entry_url);

    let response = client.get(&login.entry_url).send().await?;
    let page_url = response.url().clone();
    let body = response.text().await?;
    state = SessionState::SamlRedirectReceived;
    tracing::debug!(?state, "login form page fetched from {page_url}");

    let mut form = HtmlForm::parse(&body, login.form_selector, &page_url)?;
    form.push(login.username_field, username);
    form.push(login.password_field, password);

    let response = form.submit(client).await?;
    let page_url = response.url().clone();
    let body = response.text().await?;
    state = SessionState::LoginFormSubmitted;
    tracing::debug!(?state, "credentials submitted to {}", form.action);

    // The IdP answers with a form a browser would auto-submit. A SAMLResponse
    // field among its inputs is the only success signal; without it the
    // credentials were wrong and the final POST must not go out.
    let redirect_form = HtmlForm::parse(&body, "form", &page_url)?;
    state = SessionState::IdpRedirectFormReceived;
    if !redirect_form.has_field("SAMLResponse") {
        state = SessionState::Failed;
        tracing::debug!(?state, "no SAMLResponse field in IdP answer");
        return Err(ProviderError::auth(
            "identity provider did not return a SAMLResponse",
        ));
    }

    form_submit_and_discard(client, &redirect_form).await?;
    state = SessionState::RedirectSubmitted;
    tracing::debug!(?state, "redirect form posted to {}", redirect_form.action);

    if !jar_has_cookie(jar, &redirect_form.action, &login.session_cookie)? {
        return Err(ProviderError::auth(format!(
            "session cookie {} was not set",
            login.session_cookie
        )));
    }
    state = SessionState::SessionEstablished;
    tracing::debug!(?state, "SSO login complete");
    Ok(())
}

async fn form_submit_and_discard(client: &Client, form: &HtmlForm) -> Result<(), ProviderError> {
    let response = form.submit(client).await?;
    let _ = response.text().await;
    Ok(())
}

/// True when the jar holds a cookie with this name for the given URL.
pub fn jar_has_cookie(jar: &Jar, url: &str, name: &str) -> Result<bool, ProviderError> {
    let url: Url = url
        .parse()
        .map_err(|_| ProviderError::parse(format!("bad redirect target url: {url}")))?;
    let Some(header) = jar.cookies(&url) else {
        return Ok(false);
    };
    let cookies = header
        .to_str()
        .map_err(|_| ProviderError::parse("cookie header is not valid ascii"))?;
    Ok(cookies
        .split(';')
        .any(|pair| pair.trim_start().starts_with(&format!("{name}="))))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page_url() -> Url {
        "https://idp.example.edu/adfs/ls/?SAMLRequest=abc".parse().unwrap()
    }

    const LOGIN_PAGE: &str = r#"
        <html><body>
        <form id="loginForm" method="post" action="/adfs/ls/?SAMLRequest=abc">
            <input type="hidden" name="__VIEWSTATE" value="xyzzy" />
            <input type="hidden" name="__EVENTVALIDATION" value="tok123" />
            <input type="text" name="UserName" value="" />
            <input type="password" name="Password" value="" />
            <input type="submit" value="Sign in" />
        </form>
        </body></html>
    "#;

    const IDP_SUCCESS_PAGE: &str = r#"
        <html><body onload="document.forms[0].submit()">
        <form method="POST" action="https://cloud.timeedit.net/chalmers/web/b1/">
            <input type="hidden" name="SAMLResponse" value="PHNhbWxwOlJlc3BvbnNlPg==" />
            <input type="hidden" name="RelayState" value="/web/b1/" />
        </form>
        </body></html>
    "#;

    const IDP_FAILURE_PAGE: &str = r#"
        <html><body>
        <form method="POST" action="/adfs/ls/?SAMLRequest=abc">
            <input type="hidden" name="__VIEWSTATE" value="xyzzy" />
            <span id="errorText">Incorrect user ID or password.</span>
        </form>
        </body></html>
    "#;

    #[test]
    fn test_parse_resolves_relative_action() {
        let form = HtmlForm::parse(LOGIN_PAGE, "#loginForm", &page_url()).unwrap();
        assert_eq!(form.action, "https://idp.example.edu/adfs/ls/?SAMLRequest=abc");
    }

    #[test]
    fn test_parse_keeps_absolute_action() {
        let form = HtmlForm::parse(IDP_SUCCESS_PAGE, "form", &page_url()).unwrap();
        assert_eq!(form.action, "https://cloud.timeedit.net/chalmers/web/b1/");
    }

    #[test]
    fn test_parse_collects_only_non_empty_values() {
        let form = HtmlForm::parse(LOGIN_PAGE, "#loginForm", &page_url()).unwrap();
        assert_eq!(form.field("__VIEWSTATE"), Some("xyzzy"));
        assert_eq!(form.field("__EVENTVALIDATION"), Some("tok123"));
        // empty text inputs are left out; credentials are injected explicitly
        assert!(!form.has_field("UserName"));
        assert!(!form.has_field("Password"));
    }

    #[test]
    fn test_parse_missing_form_is_parse_failure() {
        let result = HtmlForm::parse("<html><body></body></html>", "#loginForm", &page_url());
        assert!(matches!(result, Err(ProviderError::Parse(_))));
    }

    #[test]
    fn test_parse_form_without_action_is_parse_failure() {
        let html = r#"<form id="loginForm"><input name="a" value="b"/></form>"#;
        let result = HtmlForm::parse(html, "#loginForm", &page_url());
        assert!(matches!(result, Err(ProviderError::Parse(_))));
    }

    #[test]
    fn test_idp_success_page_carries_saml_response() {
        let form = HtmlForm::parse(IDP_SUCCESS_PAGE, "form", &page_url()).unwrap();
        assert!(form.has_field("SAMLResponse"));
    }

    #[test]
    fn test_idp_failure_page_lacks_saml_response() {
        let form = HtmlForm::parse(IDP_FAILURE_PAGE, "form", &page_url()).unwrap();
        assert!(!form.has_field("SAMLResponse"));
    }

    #[test]
    fn test_duplicate_field_names_are_preserved() {
        let mut form = HtmlForm {
            action: "https://example.com/book".into(),
            fields: vec![],
        };
        form.push("o", "room-id");
        form.push("o", "purpose-id");
        assert_eq!(form.fields.len(), 2);
        assert_eq!(form.field("o"), Some("room-id"));
    }

    #[test]
    fn test_jar_has_cookie() {
        let jar = Jar::default();
        let url: Url = "https://cloud.timeedit.net/chalmers/web/b1/".parse().unwrap();
        jar.add_cookie_str("TEchalmersweb=abc123; Path=/", &url);

        assert!(jar_has_cookie(&jar, "https://cloud.timeedit.net/chalmers/web/b1/", "TEchalmersweb").unwrap());
        assert!(!jar_has_cookie(&jar, "https://cloud.timeedit.net/chalmers/web/b1/", "TEotherweb").unwrap());
        assert!(!jar_has_cookie(&jar, "https://unrelated.example.com/", "TEchalmersweb").unwrap());
    }

    // Whole-pipeline tests against a canned local portal. The first POST is
    // the credential submit and answers with the configured IdP page; the
    // second, if any, is the redirect submit.

    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    const IDP_AUTOSUBMIT_PAGE: &str = r#"
        <html><body onload="document.forms[0].submit()">
        <form method="POST" action="/Shibboleth.sso/SAML2/POST">
            <input type="hidden" name="SAMLResponse" value="PHNhbWxwOlJlc3BvbnNlPg==" />
            <input type="hidden" name="RelayState" value="/web/b1/" />
        </form>
        </body></html>
    "#;

    fn find_header_end(data: &[u8]) -> Option<usize> {
        data.windows(4).position(|window| window == b"\r\n\r\n")
    }

    async fn read_request(socket: &mut tokio::net::TcpStream) -> String {
        let mut data = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            let Ok(n) = socket.read(&mut buf).await else { break };
            if n == 0 {
                break;
            }
            data.extend_from_slice(&buf[..n]);
            if let Some(pos) = find_header_end(&data) {
                let head = String::from_utf8_lossy(&data[..pos]).to_lowercase();
                let content_length = head
                    .lines()
                    .find_map(|line| line.strip_prefix("content-length:"))
                    .and_then(|value| value.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if data.len() >= pos + 4 + content_length {
                    break;
                }
            }
        }
        String::from_utf8_lossy(&data).into_owned()
    }

    async fn spawn_portal(
        idp_page: &'static str,
        set_cookie: bool,
    ) -> (SocketAddr, Arc<AtomicUsize>) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let posts = Arc::new(AtomicUsize::new(0));
        let counter = posts.clone();

        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                let counter = counter.clone();
                tokio::spawn(async move {
                    let request = read_request(&mut socket).await;
                    let (body, cookie_line) = if request.starts_with("POST") {
                        let post_number = counter.fetch_add(1, Ordering::SeqCst) + 1;
                        if post_number == 1 {
                            (idp_page, "")
                        } else if set_cookie {
                            ("<html></html>", "Set-Cookie: TEtestweb=ok; Path=/\r\n")
                        } else {
                            ("<html></html>", "")
                        }
                    } else {
                        (LOGIN_PAGE, "")
                    };
                    let response = format!(
                        "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\n{cookie_line}Content-Length: {}\r\nConnection: close\r\n\r\n{}",
                        body.len(),
                        body
                    );
                    let _ = socket.write_all(response.as_bytes()).await;
                });
            }
        });
        (addr, posts)
    }

    fn login_settings(addr: SocketAddr) -> SamlLogin {
        SamlLogin {
            entry_url: format!("http://{addr}/sso"),
            form_selector: "#loginForm",
            username_field: "UserName",
            password_field: "Password",
            session_cookie: "TEtestweb".to_string(),
        }
    }

    #[tokio::test]
    async fn test_login_without_saml_response_fails_before_redirect_post() {
        let (addr, posts) = spawn_portal(IDP_FAILURE_PAGE, false).await;
        let jar = Arc::new(Jar::default());
        let client = crate::http_client::create_http_client("test-agent", jar.clone()).unwrap();

        let result = saml_login(&client, &jar, &login_settings(addr), "alice", "pw").await;
        assert!(matches!(result, Err(ProviderError::Auth(_))));
        // only the credential submit went out; the redirect form was never posted
        assert_eq!(posts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_login_establishes_session_when_cookie_is_set() {
        let (addr, posts) = spawn_portal(IDP_AUTOSUBMIT_PAGE, true).await;
        let jar = Arc::new(Jar::default());
        let client = crate::http_client::create_http_client("test-agent", jar.clone()).unwrap();

        saml_login(&client, &jar, &login_settings(addr), "alice", "pw")
            .await
            .unwrap();
        assert_eq!(posts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_login_fails_when_session_cookie_never_appears() {
        let (addr, posts) = spawn_portal(IDP_AUTOSUBMIT_PAGE, false).await;
        let jar = Arc::new(Jar::default());
        let client = crate::http_client::create_http_client("test-agent", jar.clone()).unwrap();

        let result = saml_login(&client, &jar, &login_settings(addr), "alice", "pw").await;
        assert!(matches!(result, Err(ProviderError::Auth(_))));
        assert_eq!(posts.load(Ordering::SeqCst), 2);
    }
}
