use std::collections::BTreeMap;

use serde::Deserialize;

pub use image::ImageFormat;

pub const MSG_REQUIRED: &str = "This field is required.";
pub const MSG_INVALID_CHOICE: &str =
    "Select a valid choice. That choice is not one of the available choices.";
pub const MSG_INVALID_IMAGE: &str =
    "Upload a valid image. The file you uploaded was either not an image or a corrupted image.";
pub const MSG_EMPTY_FILE: &str = "The submitted file is empty.";
pub const MSG_FILE_TOO_LARGE: &str = "The submitted file is too large.";
pub const MSG_INVALID_USERNAME: &str =
    "Enter a valid username. This value may contain only letters, numbers, and @/./+/-/_ characters.";
pub const MSG_USERNAME_TAKEN: &str = "A user with that username already exists.";
pub const MSG_PASSWORD_MISMATCH: &str = "The two password fields didn't match.";
pub const MSG_PASSWORD_TOO_SHORT: &str =
    "This password is too short. It must contain at least 8 characters.";
pub const MSG_BAD_CREDENTIALS: &str =
    "Please enter a correct username and password. Note that both fields may be case-sensitive.";

pub const USERNAME_MAX_LEN: usize = 150;
pub const NAME_MAX_LEN: usize = 150;
pub const GROUP_TITLE_MAX_LEN: usize = 200;
pub const GROUP_SLUG_MAX_LEN: usize = 50;
pub const PASSWORD_MIN_LEN: usize = 8;

/// Key under which errors that belong to no single field are stored.
pub const NON_FIELD: &str = "__all__";

/// Static metadata describing how a form field is presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldMeta {
    pub name: &'static str,
    pub label: &'static str,
    pub help_text: &'static str,
    pub required: bool,
}

pub const POST_TEXT_FIELD: FieldMeta = FieldMeta {
    name: "text",
    label: "Post text",
    help_text: "Text of the new post",
    required: true,
};

pub const POST_GROUP_FIELD: FieldMeta = FieldMeta {
    name: "group",
    label: "Group",
    help_text: "Group the post will belong to",
    required: false,
};

pub const POST_IMAGE_FIELD: FieldMeta = FieldMeta {
    name: "image",
    label: "Image",
    help_text: "Attach a picture to the post",
    required: false,
};

pub const COMMENT_TEXT_FIELD: FieldMeta = FieldMeta {
    name: "text",
    label: "Comment",
    help_text: "Text of the comment",
    required: true,
};

/// Validation errors keyed by field name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldErrors(BTreeMap<&'static str, Vec<String>>);

impl FieldErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: &'static str, message: impl Into<String>) {
        self.0.entry(field).or_default().push(message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn has(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    pub fn get(&self, field: &str) -> &[String] {
        self.0.get(field).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn non_field(&self) -> &[String] {
        self.get(NON_FIELD)
    }

    fn into_result<T>(self, value: T) -> Result<T, FieldErrors> {
        if self.is_empty() {
            Ok(value)
        } else {
            Err(self)
        }
    }
}

/// Raw post form fields as submitted by the browser.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PostFormInput {
    pub text: String,
    /// Group id as sent by the `<select>`; empty means "no group".
    pub group: String,
}

/// Uploaded file as received from a multipart body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageUpload {
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// Image that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidImage {
    pub filename: String,
    pub format: ImageFormat,
    pub bytes: Vec<u8>,
}

impl ValidImage {
    /// File extension the stored copy is saved under.
    pub fn extension(&self) -> &'static str {
        match self.format {
            ImageFormat::Png => "png",
            ImageFormat::Jpeg => "jpg",
            ImageFormat::Gif => "gif",
            ImageFormat::WebP => "webp",
            ImageFormat::Bmp => "bmp",
            ImageFormat::Tiff => "tiff",
            ImageFormat::Ico => "ico",
            _ => "img",
        }
    }
}

/// Accepts an upload only when it decodes as a picture.
///
/// Decoding is CPU bound; async callers run this on the blocking pool.
pub fn validate_image(upload: ImageUpload) -> Result<ValidImage, &'static str> {
    if upload.bytes.is_empty() {
        return Err(MSG_EMPTY_FILE);
    }
    let format = image::guess_format(&upload.bytes).map_err(|_| MSG_INVALID_IMAGE)?;
    image::load_from_memory_with_format(&upload.bytes, format).map_err(|_| MSG_INVALID_IMAGE)?;
    Ok(ValidImage {
        filename: upload.filename,
        format,
        bytes: upload.bytes,
    })
}

/// Cleaned post form data ready to persist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostDraft {
    pub text: String,
    pub group_id: Option<i64>,
    pub image: Option<ValidImage>,
}

/// Validates a post submission against the currently selectable group ids.
pub fn validate_post(
    input: &PostFormInput,
    image: Option<ImageUpload>,
    group_choices: &[i64],
) -> Result<PostDraft, FieldErrors> {
    let mut errors = FieldErrors::new();

    let text = input.text.trim();
    if text.is_empty() {
        errors.add(POST_TEXT_FIELD.name, MSG_REQUIRED);
    }

    let group = input.group.trim();
    let group_id = if group.is_empty() {
        None
    } else {
        match group.parse::<i64>() {
            Ok(id) if group_choices.contains(&id) => Some(id),
            _ => {
                errors.add(POST_GROUP_FIELD.name, MSG_INVALID_CHOICE);
                None
            }
        }
    };

    let image = match image.map(validate_image) {
        None => None,
        Some(Ok(image)) => Some(image),
        Some(Err(message)) => {
            errors.add(POST_IMAGE_FIELD.name, message);
            None
        }
    };

    errors.into_result(PostDraft {
        text: text.to_string(),
        group_id,
        image,
    })
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CommentFormInput {
    pub text: String,
}

/// Returns the comment text when the submission is usable.
pub fn validate_comment(input: &CommentFormInput) -> Result<String, FieldErrors> {
    let mut errors = FieldErrors::new();
    let text = input.text.trim();
    if text.is_empty() {
        errors.add(COMMENT_TEXT_FIELD.name, MSG_REQUIRED);
    }
    errors.into_result(text.to_string())
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SignupFormInput {
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub password1: String,
    pub password2: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignupDraft {
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub password: String,
}

pub fn validate_signup(input: &SignupFormInput) -> Result<SignupDraft, FieldErrors> {
    let mut errors = FieldErrors::new();

    let username = input.username.trim();
    if username.is_empty() {
        errors.add("username", MSG_REQUIRED);
    } else if !is_valid_username(username) {
        errors.add("username", MSG_INVALID_USERNAME);
    }

    for (field, value) in [
        ("first_name", &input.first_name),
        ("last_name", &input.last_name),
    ] {
        if value.trim().chars().count() > NAME_MAX_LEN {
            errors.add(
                field,
                format!("Ensure this value has at most {NAME_MAX_LEN} characters."),
            );
        }
    }

    if input.password1.is_empty() {
        errors.add("password1", MSG_REQUIRED);
    }
    if input.password2.is_empty() {
        errors.add("password2", MSG_REQUIRED);
    }
    if !input.password1.is_empty() && !input.password2.is_empty() {
        if input.password1 != input.password2 {
            errors.add("password2", MSG_PASSWORD_MISMATCH);
        } else if input.password1.chars().count() < PASSWORD_MIN_LEN {
            errors.add("password2", MSG_PASSWORD_TOO_SHORT);
        }
    }

    errors.into_result(SignupDraft {
        username: username.to_string(),
        first_name: input.first_name.trim().to_string(),
        last_name: input.last_name.trim().to_string(),
        password: input.password1.clone(),
    })
}

/// Letters, digits and `@ . + - _`, at most [`USERNAME_MAX_LEN`] characters.
pub fn is_valid_username(value: &str) -> bool {
    let len = value.chars().count();
    len > 0
        && len <= USERNAME_MAX_LEN
        && value
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '@' | '.' | '+' | '-' | '_'))
}

/// ASCII letters, digits, `-` and `_`, at most [`GROUP_SLUG_MAX_LEN`] characters.
pub fn is_valid_slug(value: &str) -> bool {
    !value.is_empty()
        && value.len() <= GROUP_SLUG_MAX_LEN
        && value
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_'))
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LoginFormInput {
    pub username: String,
    pub password: String,
    pub next: String,
}

pub fn validate_login(input: &LoginFormInput) -> Result<(), FieldErrors> {
    let mut errors = FieldErrors::new();
    if input.username.trim().is_empty() {
        errors.add("username", MSG_REQUIRED);
    }
    if input.password.is_empty() {
        errors.add("password", MSG_REQUIRED);
    }
    errors.into_result(())
}
