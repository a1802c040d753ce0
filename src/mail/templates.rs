const STYLE: &str = r#"
      body { font-family: Arial, sans-serif; line-height: 1.6; color: #333; }
      .container { max-width: 600px; margin: 0 auto; padding: 20px; }
      .button { display: inline-block; padding: 12px 24px; color: white;
                text-decoration: none; border-radius: 4px; margin: 20px 0; }
      .footer { margin-top: 30px; font-size: 12px; color: #666; }
"#;

fn render(title: &str, intro: &str, action: &str, color: &str, link: &str, valid_minutes: i64) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
  <head>
    <meta charset="utf-8">
    <style>{STYLE}</style>
  </head>
  <body>
    <div class="container">
      <h1>{title}</h1>
      <p>{intro}</p>
      <p>Follow the link below to continue:</p>
      <a href="{link}" class="button" style="background-color: {color};">{action}</a>
      <p>Or copy the link:</p>
      <p>{link}</p>
      <div class="footer">
        <p>The link is valid for {valid_minutes} minutes.</p>
        <p>If you did not request this, you can ignore this email.</p>
      </div>
    </div>
  </body>
</html>
"#
    )
}

pub fn password_reset_link(frontend_url: &str, token: &str) -> String {
    format!("{}/reset-password?token={}", frontend_url.trim_end_matches('/'), token)
}

pub fn email_change_link(frontend_url: &str, token: &str) -> String {
    format!("{}/verify-email?token={}", frontend_url.trim_end_matches('/'), token)
}

pub fn password_reset(frontend_url: &str, token: &str, valid_minutes: i64) -> String {
    render(
        "Password reset",
        "You asked to reset your password.",
        "Reset password",
        "#f44336",
        &password_reset_link(frontend_url, token),
        valid_minutes,
    )
}

pub fn email_change(frontend_url: &str, token: &str, valid_minutes: i64) -> String {
    render(
        "Confirm your new email",
        "You asked to change the email address on your account.",
        "Confirm email",
        "#4CAF50",
        &email_change_link(frontend_url, token),
        valid_minutes,
    )
}
